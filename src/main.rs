//! cachewire server - main entrypoint

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::process::ExitCode;

#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> ExitCode {
    cachewire::main(std::env::args_os())
}
