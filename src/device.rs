#[cfg(any(test, feature = "backend_cuda", feature = "backend_wgpu"))]
use std::panic::{self, AssertUnwindSafe};

use burn::{backend::NdArray, prelude::*};

#[cfg(feature = "backend_cuda")]
use burn::backend::Cuda;
#[cfg(feature = "backend_wgpu")]
use burn::backend::{
    Wgpu,
    wgpu::{RuntimeOptions, graphics::AutoGraphicsApi, init_setup},
};

pub type CpuBackend = NdArray<f32>;
#[cfg(feature = "backend_cuda")]
pub type CudaBackend = Cuda<f32>;
#[cfg(feature = "backend_wgpu")]
pub type WgpuBackend = Wgpu<f32>;

/// The device a run executes on. Accelerated variants only exist when their backend feature
/// is compiled in.
#[derive(Clone, Debug)]
pub enum ComputeDevice {
    #[cfg(feature = "backend_cuda")]
    Cuda(<CudaBackend as Backend>::Device),
    #[cfg(feature = "backend_wgpu")]
    Wgpu(<WgpuBackend as Backend>::Device),
    Cpu(<CpuBackend as Backend>::Device),
}

impl ComputeDevice {
    pub fn label(&self) -> &'static str {
        match self {
            #[cfg(feature = "backend_cuda")]
            Self::Cuda(_) => "cuda",
            #[cfg(feature = "backend_wgpu")]
            Self::Wgpu(_) => "wgpu",
            Self::Cpu(_) => "cpu",
        }
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Self::Cpu(_))
    }
}

/// Picks the first accelerated device whose runtime initializes, falling back to the CPU.
pub fn select_device() -> ComputeDevice {
    #[cfg(feature = "backend_cuda")]
    match probe_cuda() {
        Ok(device) => return ComputeDevice::Cuda(device),
        Err(reason) => log::warn!("{reason}"),
    }

    #[cfg(feature = "backend_wgpu")]
    match probe_wgpu() {
        Ok(device) => return ComputeDevice::Wgpu(device),
        Err(reason) => log::warn!("{reason}"),
    }

    ComputeDevice::Cpu(<CpuBackend as Backend>::Device::default())
}

// Runtimes initialize lazily, so touch the device once; a missing driver surfaces as a panic.
#[cfg(any(test, feature = "backend_cuda", feature = "backend_wgpu"))]
fn probe<B: Backend>(device: B::Device) -> Result<B::Device, ()> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let probe = Tensor::<B, 1>::zeros([1], &device);
        let _ = probe.into_data();
        device
    }))
    .map_err(|_| ())
}

#[cfg(feature = "backend_cuda")]
fn probe_cuda() -> Result<<CudaBackend as Backend>::Device, String> {
    probe::<CudaBackend>(<CudaBackend as Backend>::Device::default())
        .map_err(|_| "CUDA runtime unavailable, trying next device".to_string())
}

#[cfg(feature = "backend_wgpu")]
fn probe_wgpu() -> Result<<WgpuBackend as Backend>::Device, String> {
    let device = <WgpuBackend as Backend>::Device::default();
    panic::catch_unwind(AssertUnwindSafe(|| {
        init_setup::<AutoGraphicsApi>(&device, RuntimeOptions::default())
    }))
    .map_err(|_| "WGPU runtime unavailable, trying next device".to_string())?;
    probe::<WgpuBackend>(device).map_err(|_| "WGPU device failed to allocate".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_probe_succeeds() {
        let device = <CpuBackend as Backend>::Device::default();
        assert!(probe::<CpuBackend>(device).is_ok());
    }

    #[test]
    #[cfg(not(any(feature = "backend_cuda", feature = "backend_wgpu")))]
    fn falls_back_to_cpu_without_accelerated_backends() {
        let device = select_device();
        assert_eq!(device.label(), "cpu");
        assert!(!device.is_accelerated());
    }
}
