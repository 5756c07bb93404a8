/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::io;
use std::sync::Once;
use std::thread;

use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

/// Set up a logger printing all messages at `level` and above to stdout,
/// prefixed with the emitting thread.
pub fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .expect("logger init");
    })
}
