//! armimg - bootable ARM disk image builder.
//!
//! Downloads a base SBC image, grows and maps its partitions, mounts it as a
//! chroot, enables foreign-architecture execution via qemu-user-static and
//! binfmt_misc, runs provisioning commands inside the chroot, and packages
//! the result as a single-file artifact.
//!
//! The heart of the crate is [`pipeline`]: an ordered list of steps executed
//! by an owned runner that tears every acquired host resource (loop mappings,
//! mounts, binfmt registrations) down in strict reverse order on success,
//! failure, and cancellation alike.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod download;
pub mod hook;
pub mod pipeline;
pub mod process;
pub mod ui;
