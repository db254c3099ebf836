use candle_core::Device;
use tracing::{info, warn};

/// Pick the compute device once per process: CUDA device 0 when the binary
/// was built with the `cuda` feature and a GPU is present, otherwise CPU.
pub fn select_device() -> Device {
    match Device::cuda_if_available(0) {
        Ok(device) => {
            if device.is_cuda() {
                info!("Using device: cuda:0");
            } else {
                info!("Using device: cpu");
            }
            device
        }
        Err(e) => {
            warn!("CUDA initialisation failed ({}), using cpu", e);
            Device::Cpu
        }
    }
}
