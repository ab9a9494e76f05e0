pub mod cli;
pub mod collector;
pub mod config;
pub mod live;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod web;
