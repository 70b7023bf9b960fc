//! Hardware Abstraction Layer
//!
//! This module is an extension to `stm32f0xx_hal` that implements the board
//! independent driver traits on the STM32F072 peripherals used by the wall
//! controller.

pub mod flash;
pub mod scan_timer;
pub mod touch;
