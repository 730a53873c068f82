//! Device selection and compatibility validation.

use thiserror::Error;
use tracing::{info, warn};

use crate::config::CompatibilityTarget;
use crate::discovery::DeviceHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No valid info frames received from Hardwire devices")]
    NoneAvailable,
    #[error(
        "Device {device_id} is incompatible: config file is made for model {expected_model} / FW {expected_firmware}, \
         device reports model {actual_model} / FW {actual_firmware}"
    )]
    Incompatible {
        device_id: u32,
        expected_model: u8,
        actual_model: u8,
        expected_firmware: u8,
        actual_firmware: u8,
    },
    #[error("Device choice {choice:?} is not in the list of {available} available devices")]
    InvalidOperatorChoice {
        choice: Option<usize>,
        available: usize,
    },
}

/// Operator interaction needed by a session.
pub trait Operator {
    /// Pick one of several devices by index. `None` means no choice was made.
    fn choose_device(&self, devices: &[DeviceHandle]) -> Option<usize>;

    /// Approve the upload to `device`.
    fn confirm_transfer(&self, device: &DeviceHandle) -> bool;
}

/// Non-interactive operator: approves every upload, never picks among several devices.
pub struct AutoApprove;

impl Operator for AutoApprove {
    fn choose_device(&self, _devices: &[DeviceHandle]) -> Option<usize> {
        None
    }

    fn confirm_transfer(&self, _device: &DeviceHandle) -> bool {
        true
    }
}

/// Pick a device and make sure the configuration fits it.
pub fn select(
    devices: &[DeviceHandle],
    target: CompatibilityTarget,
    operator: &dyn Operator,
) -> Result<DeviceHandle, SelectionError> {
    let device = match devices {
        [] => return Err(SelectionError::NoneAvailable),
        [only] => {
            info!(device = %only, "Only one device found");
            *only
        }
        _ => {
            let choice = operator.choose_device(devices);
            match choice.and_then(|i| devices.get(i)) {
                Some(device) => *device,
                None => {
                    return Err(SelectionError::InvalidOperatorChoice {
                        choice,
                        available: devices.len(),
                    });
                }
            }
        }
    };

    check_compatible(&device, target)?;
    Ok(device)
}

/// Firmware version and model must both match.
pub fn check_compatible(
    device: &DeviceHandle,
    target: CompatibilityTarget,
) -> Result<(), SelectionError> {
    if device.firmware_version != target.firmware_version || device.model != target.model {
        warn!(
            device = %device,
            expected_model = target.model,
            expected_fw = target.firmware_version,
            "Device incompatible with config file"
        );
        return Err(SelectionError::Incompatible {
            device_id: device.device_id,
            expected_model: target.model,
            actual_model: device.model,
            expected_firmware: target.firmware_version,
            actual_firmware: device.firmware_version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pick(Option<usize>);

    impl Operator for Pick {
        fn choose_device(&self, _devices: &[DeviceHandle]) -> Option<usize> {
            self.0
        }

        fn confirm_transfer(&self, _device: &DeviceHandle) -> bool {
            true
        }
    }

    const TARGET: CompatibilityTarget = CompatibilityTarget {
        firmware_version: 12,
        model: 4,
    };

    fn dev(id: u32, model: u8, fw: u8) -> DeviceHandle {
        DeviceHandle {
            device_id: id,
            model,
            firmware_version: fw,
        }
    }

    #[test]
    fn test_single_device_selected_directly() {
        // The operator would refuse; it must not be consulted.
        let device = select(&[dev(1, 4, 12)], TARGET, &Pick(None)).unwrap();
        assert_eq!(device.device_id, 1);
    }

    #[test]
    fn test_none_available() {
        assert_eq!(
            select(&[], TARGET, &Pick(Some(0))),
            Err(SelectionError::NoneAvailable)
        );
    }

    #[test]
    fn test_operator_choice() {
        let devices = [dev(1, 4, 12), dev(2, 4, 12), dev(3, 4, 12)];
        assert_eq!(select(&devices, TARGET, &Pick(Some(2))).unwrap().device_id, 3);
    }

    #[test]
    fn test_invalid_operator_choice() {
        let devices = [dev(1, 4, 12), dev(2, 4, 12)];
        assert_eq!(
            select(&devices, TARGET, &Pick(Some(5))),
            Err(SelectionError::InvalidOperatorChoice {
                choice: Some(5),
                available: 2
            })
        );
        assert!(select(&devices, TARGET, &AutoApprove).is_err());
    }

    #[test]
    fn test_incompatible_model() {
        let err = select(&[dev(1, 3, 12)], TARGET, &AutoApprove).unwrap_err();
        assert!(matches!(
            err,
            SelectionError::Incompatible {
                expected_model: 4,
                actual_model: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_incompatible_firmware_after_choice() {
        let devices = [dev(1, 4, 12), dev(2, 4, 11)];
        assert!(matches!(
            select(&devices, TARGET, &Pick(Some(1))),
            Err(SelectionError::Incompatible { device_id: 2, .. })
        ));
    }
}
