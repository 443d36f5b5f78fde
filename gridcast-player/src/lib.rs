//! # gridcast-player: command-line stream host
//!
//! Plays a channel from a directory of stream files through the
//! `gridcast-core` controller and logs each rendered frame, or writes a
//! synthetic demo stream file to play.

pub mod config;
pub mod play;
pub mod synth;
