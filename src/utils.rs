use core::convert::Infallible;

use embedded_hal::digital::v2::OutputPin;

/// Helper trait to resolve Infallible Results
pub trait InfallibleResult<T> {
    fn infallible(self) -> T;
}

impl<T> InfallibleResult<T> for Result<T, Infallible> {
    fn infallible(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => match e {},
        }
    }
}

/// Put `value` on a parallel bus of pins, least significant bit first
pub fn drive_bus<P: OutputPin<Error = Infallible>>(pins: &mut [P], value: u8) {
    for (bit, pin) in pins.iter_mut().enumerate() {
        if value & (1 << bit) != 0 {
            pin.set_high().infallible();
        } else {
            pin.set_low().infallible();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Pin(bool);

    impl OutputPin for Pin {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 = true;
            Ok(())
        }
    }

    #[test]
    fn bus_is_lsb_first() {
        let mut pins: [Pin; 3] = Default::default();
        drive_bus(&mut pins, 0b110);
        assert_eq!(pins.iter().map(|p| p.0).collect::<std::vec::Vec<_>>(), [false, true, true]);
        drive_bus(&mut pins, 0b1001);
        assert_eq!(pins.iter().map(|p| p.0).collect::<std::vec::Vec<_>>(), [true, false, false]);
    }
}
