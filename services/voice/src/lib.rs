pub mod audio_utils;
pub mod commands;
pub mod config;
pub mod media;
pub mod render;
pub mod transport;
