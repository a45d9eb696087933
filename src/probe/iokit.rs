//! Probe for `iokit-open`: try to open the services associated with the
//! recorded user-client class.
//!
//! Logs record the user client, not the service it was opened on. The
//! client→service mapping below was precomputed with an ioscan pass over
//! several macOS releases; it cannot be computed at probe time because the
//! probe itself runs sandboxed. Opening any associated service counts as
//! allow — the original service cannot be recovered, so a permitted open on
//! a sibling service may still be a false match.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use crate::oracle::Decision;

#[allow(non_camel_case_types)]
pub(crate) type mach_port_t = u32;
#[allow(non_camel_case_types)]
pub(crate) type io_object_t = mach_port_t;
#[allow(non_camel_case_types)]
pub(crate) type kern_return_t = i32;

pub(crate) const KERN_SUCCESS: kern_return_t = 0;

#[link(name = "IOKit", kind = "framework")]
#[allow(non_upper_case_globals)]
extern "C" {
    pub(crate) static kIOMasterPortDefault: mach_port_t;

    fn IOServiceNameMatching(name: *const c_char) -> *mut c_void;
    fn IOServiceGetMatchingService(main_port: mach_port_t, matching: *mut c_void) -> io_object_t;
    fn IOServiceOpen(
        service: io_object_t,
        owning_task: mach_port_t,
        connect_type: u32,
        connect: *mut io_object_t,
    ) -> kern_return_t;
    fn IOServiceClose(connect: io_object_t) -> kern_return_t;
    pub(crate) fn IOObjectRelease(object: io_object_t) -> kern_return_t;
}

#[allow(non_upper_case_globals)]
extern "C" {
    static mach_task_self_: mach_port_t;
}

/// (service, user client) pairs, newest releases last.
#[rustfmt::skip]
const SERVICE_FOR_CLIENT: &[(&str, &str)] = &[
    // Pre-10.14.6 entries kept for older log corpora.
    ("AppleHV", "AppleHVClient"),
    ("AppleLMUController", "AppleLMUClient"),
    ("IOGraphicsDevice", "IOFramebufferSharedUserClient"),
    ("NVKernel", "nvTeslaSurfaceTesla"),
    ("SMCMotionSensor", "SMCMotionSensorClient"),

    // Common to macOS 10.14.6 (18G4032) and 10.15.4 (19E287).
    ("AGPM", "AGPMClient"),
    ("AppleAPFSContainer", "AppleAPFSUserClient"),
    ("AppleActuatorDevice", "AppleActuatorDeviceUserClient"),
    ("AppleFDEKeyStore", "AppleFDEKeyStoreUserClient"),
    ("AppleHDAEngineInput", "IOAudioEngineUserClient"),
    ("AppleHDAEngineOutput", "IOAudioEngineUserClient"),
    ("AppleHSSPIController", "AppleHSSPIControllerUserClient"),
    ("AppleHSSPIHIDDriver", "IOHIDLibUserClient"),
    ("AppleIntelFramebuffer", "IOFramebufferSharedUserClient"),
    ("AppleKeyStore", "AppleKeyStoreUserClient"),
    ("AppleMCCSControlModule", "AppleMCCSUserClient"),
    ("AppleMobileFileIntegrity", "AppleMobileFileIntegrityUserClient"),
    ("AppleMultitouchDevice", "AppleMultitouchDeviceUserClient"),
    ("ApplePlatformEnabler", "ApplePlatformEnablerUserClient"),
    ("AppleRTC", "AppleRTCUserClient"),
    ("AppleSMC", "AppleSMCClient"),
    ("AppleUpstreamUserClientDriver", "AppleUpstreamUserClient"),
    ("AudioAUUCDriver", "AudioAUUC"),
    ("IOAVBNub", "IOAVBNubUserClient"),
    ("IOAudioLevelControl", "IOAudioControlUserClient"),
    ("IOAudioSelectorControl", "IOAudioControlUserClient"),
    ("IOAudioToggleControl", "IOAudioControlUserClient"),
    ("IOBluetoothHCIController", "IOBluetoothHCIUserClient"),
    ("IODisplayWrangler", "IOAccelerationUserClient"),
    ("IOFramebufferI2CInterface", "IOI2CInterfaceUserClient"),
    ("IOHIDSystem", "IOHIDParamUserClient"),
    ("IOPMrootDomain", "RootDomainUserClient"),
    ("IOReportHub", "IOReportUserClient"),
    ("IOSurfaceRoot", "IOSurfaceRootUserClient"),
    ("IOThunderboltController", "IOThunderboltFamilyUserClient"),
    ("IOTimeSyncClockManager", "IOTimeSyncClockManagerUserClient"),
    ("IntelAccelerator", "IGAccel2DContext"),
    ("IntelAccelerator", "IGAccelCLContext"),
    ("IntelAccelerator", "IGAccelCommandQueue"),
    ("IntelAccelerator", "IGAccelDevice"),
    ("IntelAccelerator", "IGAccelGLContext"),
    ("IntelAccelerator", "IGAccelSharedUserClient"),
    ("IntelAccelerator", "IGAccelSurface"),
    ("IntelAccelerator", "IGAccelVideoContextMain"),
    ("IntelAccelerator", "IGAccelVideoContextMedia"),
    ("IntelAccelerator", "IGAccelVideoContextVEBox"),
    ("IntelAccelerator", "IOAccelDisplayPipeUserClient2"),
    ("IntelAccelerator", "IOAccelMemoryInfoUserClient"),
    ("IntelFBClientControl", "AppleGraphicsDeviceControlClient"),

    // macOS 10.14.6 (18G4032).
    ("AGDPClientControl", "AppleGraphicsDeviceControlClient"),
    ("AppleBluetoothHIDKeyboard", "IOHIDLibUserClient"),
    ("AppleHDAAudioSelectorControlDP", "IOAudioControlUserClient"),
    ("AppleHDAEngineOutputDP", "IOAudioEngineUserClient"),
    ("AppleIntelMEClientController", "AppleIntelMEUserClient"),
    ("AppleMikeyHIDDriver", "IOHIDLibUserClient"),
    ("IOBluetoothDevice", "IOBluetoothDeviceUserClient"),
    ("IOBluetoothHCIController", "IOBluetoothHCIPacketLogUserClient"),
    ("IONVMeBlockStorageDevice", "AppleNVMeSMARTUserClient"),
    ("IOUSBDevice", "IOUSBDeviceUserClientV2"),
    ("IOUSBInterface", "IOUSBInterfaceUserClientV3"),
    ("IOUSBRootHubDevice", "IOUSBDeviceUserClientV2"),

    // macOS 10.15.4 (19E287).
    ("AGDPClientControl", "AGDPUserClient"),
    ("AppleAHCIDiskDriver", "AHCISMARTUserClient"),
    ("AppleBroadcomBluetoothHostController", "IOBluetoothHostControllerUserClient"),
    ("AppleMEClientController", "AppleSNBFBUserClient"),
    ("IOBluetoothPacketLogger", "IOBluetoothPacketLoggerUserClient"),
    ("IOHIDUserDevice", "IOHIDLibUserClient"),
    ("IOTimeSyncDomain", "IOTimeSyncDomainUserClient"),
    ("IOTimeSyncgPTPManager", "IOTimeSyncgPTPManagerUserClient"),
    ("IOUSBInterface", "AppleUSBHostInterfaceUserClient"),
    ("IOUSBMassStorageResource", "IOUSBMassStorageResourceUserClient"),
    ("IOUSBRootHubDevice", "AppleUSBLegacyDeviceUserClient"),
    ("IntelAccelerator", "IOAccelGLDrawableUserClient"),
    ("IntelAccelerator", "IOAccelSurfaceMTL"),
];

fn services_for_client(user_class: &str) -> Vec<&'static str> {
    SERVICE_FOR_CLIENT
        .iter()
        .filter(|(_, client)| *client == user_class)
        .map(|(service, _)| *service)
        .collect()
}

pub fn open(user_class: &str) -> Decision {
    let services = services_for_client(user_class);
    if services.is_empty() {
        log::debug!("no known service for user client {user_class}");
        return Decision::Error;
    }

    for service_name in services {
        let Ok(name_c) = CString::new(service_name) else {
            continue;
        };

        unsafe {
            let matching = IOServiceNameMatching(name_c.as_ptr());
            if matching.is_null() {
                continue;
            }
            // IOServiceGetMatchingService consumes the matching dictionary.
            let service = IOServiceGetMatchingService(kIOMasterPortDefault, matching);
            if service == 0 {
                continue;
            }

            let mut connect: io_object_t = 0;
            let kr = IOServiceOpen(service, mach_task_self_, 0, &mut connect);
            IOObjectRelease(service);
            if kr != KERN_SUCCESS {
                continue;
            }

            IOServiceClose(connect);
        }
        return Decision::Allow;
    }

    Decision::Deny
}
