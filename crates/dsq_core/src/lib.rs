//! Host-side driver stack for the distance-squared accelerator.
//!
//! This crate provides the drivers for the three peripherals involved in an
//! accelerator invocation (interrupt controller, DMA engines, accelerator
//! control bus) and the controller that sequences them: bring-up, interrupt
//! registration, DMA transfer initiation, completion signaling and restart
//! for continuous operation. All modules are `no_std` and reach hardware only
//! through the [`platform::Platform`] and [`regs::RegisterBus`] traits, so the
//! same code runs on firmware and against the simulated system-on-chip.

#![no_std]

#[cfg(test)]
extern crate std;

use core::fmt;

/// Distance-squared accelerator control bus driver.
///
/// Wraps the high-level-synthesis control registers: start/idle/done
/// handshake, local and global interrupt enables, interrupt status and the
/// 64-bit result register.
pub mod accel;

/// Accelerator invocation controller.
///
/// Owns the bring-up order, the completion interrupt handler and the
/// run/wait/restart state machine. Exposes the blocking compute operation.
pub mod controller;

/// Simple-mode AXI DMA engine driver.
///
/// Configures an engine for polled single-buffer transfers, rejecting engines
/// built with scatter-gather support, and issues host-to-device copies.
pub mod dma;

/// Platform-level interrupt controller driver and handler dispatch table.
///
/// Validates and self-tests the controller, binds handlers to interrupt
/// lines, and demultiplexes claimed lines to the bound handlers.
pub mod intc;

/// Board abstraction used by all drivers.
///
/// Supplies configuration lookup, register window mapping, the exception
/// entry hook, cache maintenance and a monotonic clock.
pub mod platform;

/// Software reference for the accelerator's kernel.
pub mod reference;

/// 32-bit register bus abstraction and its memory-mapped implementation.
pub mod regs;

/// Single-slot completion notification shared with the interrupt handler.
pub mod signal;

pub use controller::{
    AcceleratorContext, AcceleratorController, ControllerConfig, ControllerState, RunMode,
};

/// Peripheral a bring-up failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peripheral {
    InterruptController,
    /// DMA engine, by device identifier.
    Dma(u16),
    Accelerator,
}

/// Reasons an interrupt handler could not be bound to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationFault {
    /// The interrupt controller has not been initialized.
    NotInitialized,
    /// The line is reserved or not wired into the controller.
    LineOutOfRange,
    /// A handler is already bound to the line.
    AlreadyBound,
}

/// Reasons a DMA engine rejected a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFault {
    /// The engine has no channel for the requested direction.
    NoChannel,
    /// Zero bytes, or more than the length register can express.
    InvalidLength,
    /// Address not aligned to the data width on an engine without realignment.
    Misaligned,
    /// The channel is running and has not gone idle.
    Busy,
    /// The channel halted on an internal, slave or decode error.
    EngineFault,
}

/// Error types returned by accelerator bring-up and invocation.
///
/// Every bring-up stage has its own variant so callers can tell which part of
/// the hardware failed. None of these are retried by the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelError {
    /// No configuration entry exists for the requested device.
    HardwareLookup(Peripheral),

    /// The interrupt controller failed its register self-test.
    SelfTest,

    /// The device's register window could not be bound, or its reset did not
    /// complete.
    Initialization(Peripheral),

    /// The interrupt controller refused to bind the handler.
    Registration(RegistrationFault),

    /// The DMA engine was built with scatter-gather support, which this
    /// design does not drive.
    UnsupportedMode(u16),

    /// A DMA engine rejected a transfer request.
    Transfer(TransferFault),

    /// The accelerator did not signal completion before the deadline.
    Timeout,

    /// The operation is not valid in the controller's current state.
    InvalidState(ControllerState),

    /// The context is already owned by another controller.
    ContextInUse,
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peripheral::InterruptController => write!(f, "interrupt controller"),
            Peripheral::Dma(id) => write!(f, "DMA engine {}", id),
            Peripheral::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccelError::HardwareLookup(p) => write!(f, "no configuration found for {}", p),
            AccelError::SelfTest => write!(f, "interrupt controller self-test failed"),
            AccelError::Initialization(p) => write!(f, "failed to initialize {}", p),
            AccelError::Registration(fault) => {
                write!(f, "interrupt handler registration failed: {:?}", fault)
            }
            AccelError::UnsupportedMode(id) => {
                write!(f, "DMA engine {} is configured in scatter-gather mode", id)
            }
            AccelError::Transfer(fault) => write!(f, "DMA transfer rejected: {:?}", fault),
            AccelError::Timeout => write!(f, "accelerator did not complete before the deadline"),
            AccelError::InvalidState(state) => {
                write!(f, "operation not valid in state {:?}", state)
            }
            AccelError::ContextInUse => write!(f, "accelerator context already has an owner"),
        }
    }
}

impl core::error::Error for AccelError {}
