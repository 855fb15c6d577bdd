mod common;
#[cfg(unix)]
mod linker;
mod lockfile;
mod resolver;
