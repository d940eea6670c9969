use std::collections::HashSet;

use anyhow::{anyhow, Result};
use log::{info, warn};
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::errors::SuitabilityError;
use crate::vulkan::frame::RendererData;
use crate::vulkan::queue::QueueFamilyIndices;
use crate::vulkan::swapchain::SwapchainSupport;

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

pub unsafe fn pick_physical_device(instance: &Instance, data: &mut RendererData) -> Result<()> {
    for physical_device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(physical_device);

        if let Err(error) = check_physical_device(instance, data, physical_device) {
            warn!(
                "Skipping physical device ('{}'): {}",
                properties.device_name, error
            );
        } else {
            info!("Selected physical device ('{}').", properties.device_name);
            data.physical_device = physical_device;
            return Ok(());
        }
    }
    Err(anyhow!("Failed to find a suitable physical device."))
}

unsafe fn check_physical_device(
    instance: &Instance,
    data: &RendererData,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    QueueFamilyIndices::get(instance, data, physical_device)?;

    let support = SwapchainSupport::get(instance, data, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!(SuitabilityError("Insufficient swapchain support.")));
    }

    check_physical_device_extensions(instance, physical_device)?;

    let features = instance.get_physical_device_features(physical_device);
    if features.sampler_anisotropy != vk::TRUE {
        return Err(anyhow!(SuitabilityError("No sampler anisotropy.")));
    }
    // The deferred path renders to four color targets at once.
    let limits = instance.get_physical_device_properties(physical_device).limits;
    if limits.max_color_attachments < 4 {
        return Err(anyhow!(SuitabilityError("Fewer than 4 color attachments.")));
    }

    Ok(())
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    if DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!(SuitabilityError(
            "Missing required device extensions."
        )))
    }
}
