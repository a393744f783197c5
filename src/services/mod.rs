pub mod artifacts;
pub mod encryption;
pub mod fetch;
pub mod pipeline;
pub mod scheduler;
pub mod signing;
pub mod toolchain;
