//! Instance, surface and device ownership
//!
//! [`DeviceContext`] owns everything that lives for the whole run: the
//! loader entry, the instance with its optional validation messenger, the
//! presentation surface and the logical device. Every other Vulkan object in
//! the crate holds a clone of the `ash::Device` function table and must be
//! dropped before the context.
//!
//! Fields are declared so that implicit drop order is the reverse of
//! creation order: device, surface, instance.

use crate::error::{VulkanError, VulkanResult};
use crate::window::SurfaceProvider;
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "render_core";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the given extensions, optionally with validation
    pub fn new(
        app_name: &str,
        required_extensions: &[String],
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}"))
        })?;

        let enable_validation =
            enable_validation && Self::layer_available(&entry, VALIDATION_LAYER)?;

        let app_name_cstr = to_cstring(app_name)?;
        let engine_name_cstr = to_cstring(ENGINE_NAME)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut cstr_extensions = required_extensions
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        if enable_validation {
            cstr_extensions.push(DebugUtils::name().to_owned());
        }
        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names = if enable_validation {
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        // Also attached to instance creation so create/destroy are covered
        let mut messenger_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if enable_validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = messenger_create_info();
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(VulkanError::Api(err));
                }
            }
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance for \"{}\" (validation {})",
            app_name,
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    fn layer_available(entry: &Entry, name: &str) -> VulkanResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(VulkanError::Api)?;
        let found = layers.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            layer_name.to_str() == Ok(name)
        });
        if !found {
            log::warn!("Validation requested but {name} is not installed");
        }
        Ok(found)
    }

    /// Whether the validation messenger is active
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| {
        VulkanError::InitializationFailed(format!("String contains a NUL byte: {value:?}"))
    })
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Routes validation layer output into the `log` facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Presentation surface and its extension loader
pub struct SurfaceBinding {
    /// Surface extension loader
    pub loader: Surface,
    /// Surface handle
    pub handle: vk::SurfaceKHR,
}

impl Drop for SurfaceBinding {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types, queried once
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device that can render to `surface`, or any graphics
    /// device when running headless
    pub fn select_suitable_device(
        instance: &Instance,
        surface: Option<&SurfaceBinding>,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(reason) => {
                    let properties = unsafe { instance.get_physical_device_properties(device) };
                    let name =
                        unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
                    log::debug!("Skipping GPU {name}: {reason}");
                }
            }
        }

        Err(VulkanError::InitializationFailed(
            "No suitable GPU found".to_string(),
        ))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: Option<&SurfaceBinding>,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        if features.sampler_anisotropy == vk::FALSE {
            return Err(VulkanError::InitializationFailed(
                "Sampler anisotropy not supported".to_string(),
            ));
        }

        let mut graphics_family = None;
        let mut present_family = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }

            let present_support = match surface {
                Some(surface) => unsafe {
                    surface
                        .loader
                        .get_physical_device_surface_support(device, index, surface.handle)
                        .map_err(VulkanError::Api)?
                },
                None => family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            };

            if present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;
        let present_family = present_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No present queue family found".to_string())
        })?;

        if let Some(surface) = surface {
            if !Self::supports_swapchain(instance, device)? {
                return Err(VulkanError::InitializationFailed(
                    "Swapchain extension not supported".to_string(),
                ));
            }

            let formats = unsafe {
                surface
                    .loader
                    .get_physical_device_surface_formats(device, surface.handle)
                    .map_err(VulkanError::Api)?
            };
            let present_modes = unsafe {
                surface
                    .loader
                    .get_physical_device_surface_present_modes(device, surface.handle)
                    .map_err(VulkanError::Api)?
            };
            if formats.is_empty() || present_modes.is_empty() {
                return Err(VulkanError::InitializationFailed(
                    "Surface reports no formats or present modes".to_string(),
                ));
            }
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        })
    }

    fn supports_swapchain(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<bool> {
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        Ok(extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        }))
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create the logical device with one queue per distinct family
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        enable_swapchain: bool,
    ) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [
            physical_device_info.graphics_family,
            physical_device_info.present_family,
        ]
        .into_iter()
        .collect();

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let swapchain_extension = [SwapchainLoader::name().as_ptr()];
        let extensions: &[*const std::os::raw::c_char] = if enable_swapchain {
            &swapchain_extension
        } else {
            &[]
        };

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue =
            unsafe { device.get_device_queue(physical_device_info.graphics_family, 0) };
        let present_queue =
            unsafe { device.get_device_queue(physical_device_info.present_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
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

/// Long-lived Vulkan state shared by every other component
pub struct DeviceContext {
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface: Option<SurfaceBinding>,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Create a context that presents to a window surface
    pub fn new(
        window: &mut impl SurfaceProvider,
        app_name: &str,
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let required_extensions = window.required_instance_extensions().map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}"))
        })?;

        let instance = VulkanInstance::new(app_name, &required_extensions, enable_validation)?;

        let surface_handle = window
            .create_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {e}")))?;
        let surface = SurfaceBinding {
            loader: Surface::new(&instance.entry, &instance.instance),
            handle: surface_handle,
        };

        let physical_device =
            PhysicalDeviceInfo::select_suitable_device(&instance.instance, Some(&surface))?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, true)?;

        Ok(Self {
            device,
            physical_device,
            surface: Some(surface),
            instance,
        })
    }

    /// Create a context with no surface, for offscreen work and tests
    pub fn headless(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(app_name, &[], enable_validation)?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, None)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, false)?;

        Ok(Self {
            device,
            physical_device,
            surface: None,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the raw Device function table
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Surface handle and loader; errors on a headless context
    pub fn surface(&self) -> VulkanResult<&SurfaceBinding> {
        self.surface
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("Context was created without a surface"))
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Distinct queue family indices, graphics first
    pub fn queue_family_indices(&self) -> Vec<u32> {
        let graphics = self.physical_device.graphics_family;
        let present = self.physical_device.present_family;
        if graphics == present {
            vec![graphics]
        } else {
            vec![graphics, present]
        }
    }

    /// Memory types of the selected device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Format capabilities of the selected device
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical_device.device, format)
        }
    }

    /// Largest sampler anisotropy the device accepts
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.physical_device.properties.limits.max_sampler_anisotropy
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }
}
