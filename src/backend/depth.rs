// Depth buffer - one D16 image shared by every framebuffer
//
// Sized to the swapchain extent; recreated together with the swapchain.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;
use crate::error::VkResultExt;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Size and memory type the depth image was allocated with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocation {
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
}

pub struct DepthBuffer {
    pub format: vk::Format,
    pub image: vk::Image,
    pub allocation: MemoryAllocation,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthBuffer {
    pub fn new(device: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let dev = &device.device;
        let image_info = depth_image_info(extent);

        let image = unsafe { dev.create_image(&image_info, None) }.vk_op("vkCreateImage")?;

        let (allocation, memory) = match Self::bind_memory(device, image) {
            Ok(bound) => bound,
            Err(e) => {
                unsafe { dev.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { dev.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(code) => {
                unsafe {
                    dev.destroy_image(image, None);
                    dev.free_memory(memory, None);
                }
                return Err::<Self, _>(code).vk_op("vkCreateImageView");
            }
        };

        Ok(Self {
            format: DEPTH_FORMAT,
            image,
            allocation,
            memory,
            view,
        })
    }

    /// Allocate device memory for `image` and bind it. Nothing is left
    /// allocated on failure.
    fn bind_memory(
        device: &VulkanDevice,
        image: vk::Image,
    ) -> Result<(MemoryAllocation, vk::DeviceMemory)> {
        let dev = &device.device;
        let requirements = unsafe { dev.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type_fallback(
            &device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("No memory type can back the depth image")?;

        let allocation = MemoryAllocation {
            size: requirements.size,
            memory_type_index,
        };
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(allocation.size)
            .memory_type_index(allocation.memory_type_index);

        let memory =
            unsafe { dev.allocate_memory(&alloc_info, None) }.vk_op("vkAllocateMemory")?;

        if let Err(code) = unsafe { dev.bind_image_memory(image, memory, 0) } {
            unsafe { dev.free_memory(memory, None) };
            return Err::<(MemoryAllocation, vk::DeviceMemory), _>(code).vk_op("vkBindImageMemory");
        }

        Ok((allocation, memory))
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

pub fn depth_image_info(extent: vk::Extent2D) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(DEPTH_FORMAT)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

/// First memory type allowed by `type_bits` that has all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Like `find_memory_type`, but settles for any allowed type when none has
/// the requested properties.
pub fn find_memory_type_fallback(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    preferred: vk::MemoryPropertyFlags,
) -> Option<u32> {
    find_memory_type(props, type_bits, preferred)
        .or_else(|| find_memory_type(props, type_bits, vk::MemoryPropertyFlags::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn depth_image_matches_extent() {
        for (width, height) in [(500, 500), (1, 1), (1920, 1080), (333, 7)] {
            let info = depth_image_info(vk::Extent2D { width, height });
            assert_eq!(info.extent, vk::Extent3D { width, height, depth: 1 });
            assert_eq!(info.array_layers, 1);
            assert_eq!(info.mip_levels, 1);
            assert_eq!(info.format, vk::Format::D16_UNORM);
            assert_eq!(info.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        }
    }

    #[test]
    fn picks_device_local_type_allowed_by_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        // Type 0 is excluded by the bits
        let index = find_memory_type(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(2));
    }

    #[test]
    fn fallback_ignores_properties() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
        assert_eq!(
            find_memory_type_fallback(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
    }

    #[test]
    fn no_type_when_bits_exclude_everything() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type_fallback(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }
}
