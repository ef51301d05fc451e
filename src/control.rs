//! Platform power control of the controller.
use crate::transport::TransportConfig;
use crate::Error;

/// Board level hooks, called from the power state machine.
pub trait BluetoothControl {
    fn init(&mut self, config: &TransportConfig) {
        let _ = config;
    }

    fn on(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn off(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn wake(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
