pub mod cli;
pub mod colors;
pub mod config;
pub mod dependency;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod install;
pub mod linker;
pub mod lockfile;
pub mod manifest;
pub mod peering;
pub mod resolver;
pub mod storage;
#[cfg(test)]
pub mod tests;
