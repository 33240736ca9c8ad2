//! Vulkan context management
//!
//! Instance, debug messenger, physical device selection and the logical
//! device. Everything created later hangs off the [`LogicalDevice`], which in
//! turn must be dropped before the [`VulkanInstance`].

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Entry, Instance};
use std::collections::BTreeSet;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::impl_device_object;
use super::surface::Surface;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::usage(format!("interior NUL in {value:?}")))
}

/// Counters updated by the validation callback
#[derive(Debug, Default)]
pub struct MessageStats {
    errors: AtomicU32,
    warnings: AtomicU32,
}

impl MessageStats {
    /// Validation errors reported so far
    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Validation warnings reported so far
    pub fn warnings(&self) -> u32 {
        self.warnings.load(Ordering::Relaxed)
    }
}

/// Debug-utils messenger forwarding validation output to `log`
///
/// Owned by the [`VulkanInstance`] that created it; the callback state lives
/// in a heap allocation handed to the driver as user data.
pub struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    stats: Box<MessageStats>,
}

impl DebugMessenger {
    fn new(entry: &Entry, instance: &Instance) -> VulkanResult<Self> {
        let loader = DebugUtils::new(entry, instance);
        let stats = Box::<MessageStats>::default();

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(&*stats as *const MessageStats as *mut c_void);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("debug messenger creation")?;

        Ok(Self {
            loader,
            messenger,
            stats,
        })
    }

    /// Message counters collected since creation
    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

impl_device_object!(DebugMessenger, vk::DebugUtilsMessengerEXT, messenger);

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };
    let stats = (user_data as *const MessageStats).as_ref();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        if let Some(stats) = stats {
            stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        if let Some(stats) = stats {
            stats.warnings.fetch_add(1, Ordering::Relaxed);
        }
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    debug_messenger: Option<DebugMessenger>,
    instance: Instance,
    entry: Entry,
}

impl VulkanInstance {
    /// Create an instance enabling `extensions` and, optionally, validation
    ///
    /// Validation is silently downgraded to off when the Khronos layer is not
    /// installed.
    pub fn new(app_name: &str, extensions: &[String], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| VulkanError::Loading(e.to_string()))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("frame_pipeline")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let enable_validation = enable_validation && Self::validation_layer_available(&entry)?;

        let mut extension_names = extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        if enable_validation {
            extension_names.push(DebugUtils::name().to_owned());
        }
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let layer_ptrs: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        log::debug!("Creating Vulkan instance (validation: {})...", enable_validation);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("instance creation")?;

        let debug_messenger = if enable_validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_messenger,
            instance,
            entry,
        })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("instance layer enumeration")?;
        let available = layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        });
        if !available {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        Ok(available)
    }

    /// Loader entry points
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance function table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The validation messenger, when validation is active
    pub fn debug_messenger(&self) -> Option<&DebugMessenger> {
        self.debug_messenger.as_ref()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        // The messenger is a child of the instance
        self.debug_messenger.take();
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

impl crate::render::vulkan::handle::DeviceObject for VulkanInstance {
    type Raw = vk::Instance;

    fn raw_handle(&self) -> vk::Instance {
        self.instance.handle()
    }
}

/// Graphics and presentation queue family indices for one device/surface pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: Option<u32>,
    /// First family able to present to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan queue families, preferring one family that does both jobs
    ///
    /// `supports_present` is queried per family index; pass `|_| Ok(false)`
    /// when no surface is involved.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> VulkanResult<bool>,
    ) -> VulkanResult<Self> {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let graphics = family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(index)?;

            if graphics && present {
                return Ok(Self {
                    graphics: Some(index),
                    present: Some(index),
                });
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if present && indices.present.is_none() {
                indices.present = Some(index);
            }
        }

        Ok(indices)
    }

    /// Both families were found
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, for queue creation and sharing decisions
    pub fn unique(&self) -> Vec<u32> {
        self.graphics
            .into_iter()
            .chain(self.present)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Graphics index (always set) and present index (set when a surface was given)
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Select the first GPU that can render and present to `surface`
    pub fn select(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        Self::select_with(instance, |candidate| Self::evaluate_for_surface(instance, candidate, surface))
    }

    /// Select the first GPU with a graphics queue, without presentation
    ///
    /// The graphics family doubles as the present family so that a
    /// [`LogicalDevice`] can be built for offscreen work.
    pub fn select_headless(instance: &Instance) -> VulkanResult<Self> {
        Self::select_with(instance, |candidate| {
            let mut info = Self::query(instance, candidate, |_| Ok(false))?;
            let graphics = info
                .queue_families
                .graphics
                .ok_or(VulkanError::MissingQueueFamily("graphics"))?;
            info.queue_families.present = Some(graphics);
            Ok(info)
        })
    }

    fn select_with(
        instance: &Instance,
        mut evaluate: impl FnMut(vk::PhysicalDevice) -> VulkanResult<Self>,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("physical device enumeration")?;

        for device in devices {
            match evaluate(device) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(reason) => log::debug!("Skipping GPU {:?}: {}", device, reason),
            }
        }

        Err(VulkanError::NoSuitableDevice)
    }

    fn query(
        instance: &Instance,
        device: vk::PhysicalDevice,
        supports_present: impl FnMut(u32) -> VulkanResult<bool>,
    ) -> VulkanResult<Self> {
        let (properties, features, memory_properties, families) = unsafe {
            (
                instance.get_physical_device_properties(device),
                instance.get_physical_device_features(device),
                instance.get_physical_device_memory_properties(device),
                instance.get_physical_device_queue_family_properties(device),
            )
        };

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            queue_families: QueueFamilyIndices::find(&families, supports_present)?,
        })
    }

    fn evaluate_for_surface(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<Self> {
        let info = Self::query(instance, device, |family| surface.supports_present(device, family))?;

        if info.queue_families.graphics.is_none() {
            return Err(VulkanError::MissingQueueFamily("graphics"));
        }
        if info.queue_families.present.is_none() {
            return Err(VulkanError::MissingQueueFamily("present"));
        }

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("device extension enumeration")?;
        let has_swapchain = extensions.iter().any(|available| {
            (unsafe { CStr::from_ptr(available.extension_name.as_ptr()) }) == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::MissingExtension(
                SwapchainLoader::name().to_string_lossy().into_owned(),
            ));
        }

        if info.features.sampler_anisotropy != vk::TRUE {
            return Err(VulkanError::MissingFeature("samplerAnisotropy"));
        }

        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            return Err(VulkanError::MissingFeature("surface formats and present modes"));
        }

        Ok(info)
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    device: Device,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    graphics_family: u32,
    present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create a device with one queue per unique family and the swapchain extension
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        Self::with_extensions(instance, info, &[SwapchainLoader::name()])
    }

    /// Create a device enabling exactly `extensions`
    ///
    /// Anisotropic sampling is enabled whenever the hardware offers it.
    pub fn with_extensions(
        instance: &Instance,
        info: &PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> VulkanResult<Self> {
        let graphics_family = info
            .queue_families
            .graphics
            .ok_or(VulkanError::MissingQueueFamily("graphics"))?;
        let present_family = info
            .queue_families
            .present
            .ok_or(VulkanError::MissingQueueFamily("present"))?;

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        log::debug!("Creating logical device...");
        let device = unsafe { instance.create_device(info.device, &create_info, None) }
            .context("logical device creation")?;

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
            )
        };
        log::debug!(
            "Logical device created (graphics family {}, present family {})",
            graphics_family,
            present_family
        );

        Ok(Self {
            device,
            instance: instance.clone(),
            physical_device: info.device,
            memory_properties: info.memory_properties,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
        })
    }

    /// Device function table
    pub fn raw(&self) -> &Device {
        &self.device
    }

    /// Instance function table, for physical-device queries
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The adapter this device was created on
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Memory types available for allocations
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Tiling feature support for `format`
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Present queue family index
    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    /// Queue used for rendering and transfers
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue used for presentation
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.context("device wait idle")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

impl crate::render::vulkan::handle::DeviceObject for LogicalDevice {
    type Raw = vk::Device;

    fn raw_handle(&self) -> vk::Device {
        self.device.handle()
    }
}
