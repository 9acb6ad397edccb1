//! Tsforged - MPEG-TS to fragmented MP4 transmuxer
//!
//! The demuxer lives in `tsforged-probe`, the fMP4 remuxer in
//! `tsforged-media`. This crate adds the adaptive loader ([`io`]), the
//! multi-segment session controller ([`transmux`]) and configuration
//! loading for the `tsforged` binary.

pub mod config;
pub mod io;
pub mod transmux;
