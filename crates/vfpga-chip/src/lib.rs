//! Silicon model for a vFPGA region hosting a streaming inference kernel.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the shell as seen from the host: the kernel's control
//! register map, the host-controlled descriptor registers of the region,
//! the region's mapping layout, and host page geometry.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Kernel control registers (status, batch size, mode) and bit definitions |
//! | [`ctrl`] | Descriptor registers used to post READ / WRITE / TRANSFER operations |
//! | [`bar`] | Region mapping layout (descriptor page, kernel CSR window) |
//! | [`page`] | Host allocation classes and page arithmetic |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bar;
pub mod ctrl;
pub mod page;
pub mod regs;
