#![doc = "positronic-core: core logic library for positronic."]

//! Everything needed to republish shared NewsBlur stories as Hugo pages in a GitHub repository:
//! the remote contracts and their HTTP clients, the watermark-bounded story iterator, the page
//! renderer, the checkpoint store, the branch session and the driver tying them together.
//!
//! # Usage
//! Build a [`newsblur::NewsblurClient`] and a [`github::GithubClient`] (each with its own
//! [`rate_limit::RateLimiter`]), then call [`synchronise::synchronise`] with a
//! [`config::PublishConfig`]. Tests substitute the `Mock*` types generated for the traits in
//! [`contract`].

pub mod checkpoint;
pub mod config;
pub mod contract;
pub mod error;
pub mod github;
pub mod newsblur;
pub mod rate_limit;
pub mod render;
pub mod session;
pub mod stories;
pub mod synchronise;
