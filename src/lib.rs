//! Per-session audio queue that caches tracks on disk and streams their
//! encoded frames to a real-time sink.
//!
//! The entry point is [`player::Player`]: enqueue URLs, join a
//! [`sink::Sink`], and call `play`. Track metadata and downloads come from a
//! [`resolver::Resolver`]; [`resolver::direct::DirectResolver`] handles plain
//! audio file URLs and M3U playlists.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod control;
pub mod decoder;
pub mod error;
pub mod events;
pub mod format;
pub mod http;
pub mod pipe;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod signal;
pub mod sink;
pub mod track;

#[cfg(test)]
mod testing;
