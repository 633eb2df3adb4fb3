//! Shared fakes for the integration tests
//!
//! Every platform call is appended to one ordered log so that tests can
//! assert on the exact sequence of side effects and their undo.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;

use nos_efi_image::config::ExecConfig;
use nos_efi_image::image::{Image, ImageList, ImageRef};
use nos_efi_image::platform::{
    AuxServices, BootServices, LoadError, LoadedImageRecord, NotifyFn, SecondStage, SnpDevice,
    SnpDevices,
};
use nos_efi_image::shim::ShimRegistry;
use nos_efi_image::EfiImageExec;
use uefi_raw::table::boot::MemoryType;
use uefi_raw::{Guid, Handle, Status};

pub type EventLog = Rc<RefCell<Vec<&'static str>>>;

pub const FIRMWARE_IMAGE: usize = 0x1;
pub const LOADED_IMAGE: usize = 0x100;
pub const DEVICE: usize = 0x200;

pub fn handle(value: usize) -> Handle {
    value as Handle
}

/// Minimal PE image for the running architecture
pub fn pe_image() -> Vec<u8> {
    let lfanew = 0x80usize;
    let mut data = vec![0u8; lfanew + 264];
    data[0..2].copy_from_slice(&0x5a4du16.to_le_bytes());
    data[0x3c..0x40].copy_from_slice(&(lfanew as u32).to_le_bytes());
    data[lfanew..lfanew + 4].copy_from_slice(&0x4550u32.to_le_bytes());
    let magic: u16 = if cfg!(target_pointer_width = "64") { 0x20b } else { 0x10b };
    data[lfanew + 24..lfanew + 26].copy_from_slice(&magic.to_le_bytes());
    data
}

/// UCS-2 little endian encoding of `text`
pub fn ucs2_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Load,
    Violate,
    Fail(Status),
}

/// Loaded image record contents, shared with the test
#[derive(Debug)]
pub struct LoadedState {
    pub parent: Handle,
    pub device: Handle,
    pub options: *const u16,
    pub options_size: u32,
    pub code_type: MemoryType,
}

impl Default for LoadedState {
    fn default() -> Self {
        Self {
            parent: handle(FIRMWARE_IMAGE),
            device: handle(DEVICE),
            options: std::ptr::null(),
            options_size: 0,
            code_type: MemoryType::LOADER_CODE,
        }
    }
}

pub struct FakeLoadedImage {
    state: Rc<RefCell<LoadedState>>,
}

impl LoadedImageRecord for FakeLoadedImage {
    fn parent_handle(&self) -> Handle {
        self.state.borrow().parent
    }

    fn device_handle(&self) -> Handle {
        self.state.borrow().device
    }

    fn set_device_handle(&mut self, device: Handle) {
        self.state.borrow_mut().device = device;
    }

    fn load_options_size(&self) -> u32 {
        self.state.borrow().options_size
    }

    fn has_load_options(&self) -> bool {
        !self.state.borrow().options.is_null()
    }

    fn image_code_type(&self) -> MemoryType {
        self.state.borrow().code_type
    }

    unsafe fn set_load_options(&mut self, options: *const u16, size: u32) {
        let mut state = self.state.borrow_mut();
        state.options = options;
        state.options_size = size;
    }
}

struct FakeEvent {
    notify: NotifyFn,
    context: *mut c_void,
    closed: bool,
    registered: bool,
}

/// Boot services double
pub struct FakeBoot {
    log: EventLog,
    pub load_outcome: Cell<LoadOutcome>,
    pub start_status: Cell<Status>,
    pub unload_status: Cell<Status>,
    pub fail_create_event: Cell<bool>,
    pub fail_register: Cell<bool>,
    pub fail_signal: Cell<bool>,
    pub fail_stop_pxe: Cell<bool>,
    pub fail_open: Cell<bool>,
    /// Started images install a shim lock instance, as shim does
    pub start_installs_shim_lock: Cell<bool>,
    pub loaded: Rc<RefCell<LoadedState>>,
    pub loaded_paths: RefCell<Vec<Vec<u8>>>,
    pub loaded_sizes: RefCell<Vec<usize>>,
    pub started_cmdline: RefCell<Option<String>>,
    pub unloaded: RefCell<Vec<Handle>>,
    events: RefCell<Vec<FakeEvent>>,
    shim_locks: Cell<usize>,
    cursors: RefCell<Vec<usize>>,
    pub verified: RefCell<Vec<usize>>,
}

impl FakeBoot {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            load_outcome: Cell::new(LoadOutcome::Load),
            start_status: Cell::new(Status::SUCCESS),
            unload_status: Cell::new(Status::SUCCESS),
            fail_create_event: Cell::new(false),
            fail_register: Cell::new(false),
            fail_signal: Cell::new(false),
            fail_stop_pxe: Cell::new(false),
            fail_open: Cell::new(false),
            start_installs_shim_lock: Cell::new(false),
            loaded: Rc::new(RefCell::new(LoadedState::default())),
            loaded_paths: RefCell::new(Vec::new()),
            loaded_sizes: RefCell::new(Vec::new()),
            started_cmdline: RefCell::new(None),
            unloaded: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            shim_locks: Cell::new(0),
            cursors: RefCell::new(Vec::new()),
            verified: RefCell::new(Vec::new()),
        }
    }

    fn record(&self, entry: &'static str) {
        self.log.borrow_mut().push(entry);
    }

    /// Install a new shim lock protocol instance and run the matching
    /// notifications
    pub fn install_shim_lock(&self) {
        self.shim_locks.set(self.shim_locks.get() + 1);
        let pending: Vec<(NotifyFn, *mut c_void)> = self
            .events
            .borrow()
            .iter()
            .filter(|event| event.registered && !event.closed)
            .map(|event| (event.notify, event.context))
            .collect();
        for (notify, context) in pending {
            unsafe { notify(context) };
        }
    }

    pub fn open_events(&self) -> usize {
        self.events.borrow().iter().filter(|event| !event.closed).count()
    }
}

impl BootServices for FakeBoot {
    type LoadedImage = FakeLoadedImage;
    type Event = usize;
    type Registration = usize;
    type ShimLock = usize;

    fn image_handle(&self) -> Handle {
        handle(FIRMWARE_IMAGE)
    }

    fn load_image(&self, parent: Handle, path: &[u8], data: &[u8]) -> Result<Handle, LoadError> {
        assert_eq!(parent, handle(FIRMWARE_IMAGE));
        self.record("load_image");
        self.loaded_paths.borrow_mut().push(path.to_vec());
        self.loaded_sizes.borrow_mut().push(data.len());
        match self.load_outcome.get() {
            LoadOutcome::Load => Ok(handle(LOADED_IMAGE)),
            LoadOutcome::Violate => Err(LoadError::SecurityViolation(handle(LOADED_IMAGE))),
            LoadOutcome::Fail(status) => Err(LoadError::Failed(status)),
        }
    }

    fn unload_image(&self, image: Handle) -> Result<(), Status> {
        self.record("unload_image");
        self.unloaded.borrow_mut().push(image);
        match self.unload_status.get() {
            Status::SUCCESS => Ok(()),
            status => Err(status),
        }
    }

    fn start_image(&self, image: Handle) -> Result<(), Status> {
        assert_eq!(image, handle(LOADED_IMAGE));
        self.record("start_image");

        let (options, size) = {
            let state = self.loaded.borrow();
            (state.options, state.options_size)
        };
        if !options.is_null() {
            let units = unsafe { std::slice::from_raw_parts(options, size as usize / 2) };
            let text = String::from_utf16_lossy(units);
            *self.started_cmdline.borrow_mut() = Some(text.trim_end_matches('\0').to_string());
        }

        if self.start_installs_shim_lock.get() {
            self.install_shim_lock();
        }

        match self.start_status.get() {
            Status::SUCCESS => Ok(()),
            status => Err(status),
        }
    }

    fn open_loaded_image(&self, image: Handle) -> Result<Self::LoadedImage, Status> {
        assert_eq!(image, handle(LOADED_IMAGE));
        self.record("open_loaded_image");
        if self.fail_open.get() {
            return Err(Status::UNSUPPORTED);
        }
        Ok(FakeLoadedImage {
            state: Rc::clone(&self.loaded),
        })
    }

    fn connect_all_drivers(&self) {
        self.record("connect_all_drivers");
    }

    unsafe fn create_event(&self, notify: NotifyFn, context: *mut c_void) -> Result<usize, Status> {
        self.record("create_event");
        if self.fail_create_event.get() {
            return Err(Status::OUT_OF_RESOURCES);
        }
        let mut events = self.events.borrow_mut();
        events.push(FakeEvent {
            notify,
            context,
            closed: false,
            registered: false,
        });
        Ok(events.len() - 1)
    }

    fn close_event(&self, event: usize) {
        self.record("close_event");
        let mut events = self.events.borrow_mut();
        assert!(!events[event].closed, "event closed twice");
        events[event].closed = true;
    }

    fn signal_event(&self, event: usize) -> Result<(), Status> {
        self.record("signal_event");
        if self.fail_signal.get() {
            return Err(Status::INVALID_PARAMETER);
        }
        let (notify, context) = {
            let events = self.events.borrow();
            (events[event].notify, events[event].context)
        };
        unsafe { notify(context) };
        Ok(())
    }

    fn register_protocol_notify(&self, protocol: &Guid, event: usize) -> Result<usize, Status> {
        assert_eq!(*protocol, nos_efi_image::shim::SHIM_LOCK_PROTOCOL_GUID);
        self.record("register_protocol_notify");
        if self.fail_register.get() {
            return Err(Status::OUT_OF_RESOURCES);
        }
        self.events.borrow_mut()[event].registered = true;
        let mut cursors = self.cursors.borrow_mut();
        cursors.push(0);
        Ok(cursors.len() - 1)
    }

    fn locate_shim_lock(&self, registration: usize) -> Option<usize> {
        let mut cursors = self.cursors.borrow_mut();
        let cursor = &mut cursors[registration];
        if *cursor < self.shim_locks.get() {
            *cursor += 1;
            Some(*cursor - 1)
        } else {
            None
        }
    }

    fn shim_lock_verify(&self, lock: usize, buffer: &[u8]) -> Status {
        assert!(buffer.is_empty());
        self.verified.borrow_mut().push(lock);
        Status::SECURITY_VIOLATION
    }

    fn stop_pxe_base_code(&self, device: Handle) -> Result<(), Status> {
        assert_eq!(device, handle(DEVICE));
        self.record("stop_pxe_base_code");
        if self.fail_stop_pxe.get() {
            Err(Status::UNSUPPORTED)
        } else {
            Ok(())
        }
    }
}

/// SNP device bookkeeping double
pub struct FakeSnp {
    log: EventLog,
    pub present: Cell<bool>,
    path: Vec<u8>,
}

impl FakeSnp {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            present: Cell::new(true),
            // MAC address node followed by the end node
            path: vec![0x03, 0x0b, 0x04, 0x00, 0x7f, 0xff, 0x04, 0x00],
        }
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }
}

impl SnpDevices for FakeSnp {
    fn last_opened(&self) -> Option<SnpDevice<'_>> {
        self.present.get().then(|| SnpDevice {
            handle: handle(DEVICE),
            path: &self.path,
            name: "net0",
        })
    }

    fn release(&self) {
        self.log.borrow_mut().push("snp_release");
    }

    fn claim(&self) {
        self.log.borrow_mut().push("snp_claim");
    }
}

/// Auxiliary protocol double
pub struct FakeAux {
    log: EventLog,
    pub fail_at: Cell<Option<&'static str>>,
    pub second_stage: RefCell<Option<(String, String)>>,
}

impl FakeAux {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_at: Cell::new(None),
            second_stage: RefCell::new(None),
        }
    }

    fn install(&self, entry: &'static str) -> Result<(), Status> {
        self.log.borrow_mut().push(entry);
        if self.fail_at.get() == Some(entry) {
            Err(Status::DEVICE_ERROR)
        } else {
            Ok(())
        }
    }
}

impl AuxServices for FakeAux {
    fn install_file(&self, device: Handle, second: Option<SecondStage<'_>>) -> Result<(), Status> {
        assert_eq!(device, handle(DEVICE));
        *self.second_stage.borrow_mut() = second
            .map(|second| (second.image.name().to_string(), second.name.to_string()));
        self.install("install_file")
    }

    fn uninstall_file(&self, _device: Handle) {
        self.log.borrow_mut().push("uninstall_file");
    }

    fn install_pxe(&self, _device: Handle) -> Result<(), Status> {
        self.install("install_pxe")
    }

    fn uninstall_pxe(&self, _device: Handle) {
        self.log.borrow_mut().push("uninstall_pxe");
    }

    fn install_download(&self, _device: Handle) -> Result<(), Status> {
        self.install("install_download")
    }

    fn uninstall_download(&self, _device: Handle) {
        self.log.borrow_mut().push("uninstall_download");
    }
}

/// Complete fake platform
pub struct Platform {
    pub log: EventLog,
    pub boot: FakeBoot,
    pub snp: FakeSnp,
    pub aux: FakeAux,
    pub images: ImageList,
    pub shims: ShimRegistry,
}

impl Platform {
    pub fn new() -> Self {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        Self {
            boot: FakeBoot::new(Rc::clone(&log)),
            snp: FakeSnp::new(Rc::clone(&log)),
            aux: FakeAux::new(Rc::clone(&log)),
            images: ImageList::new(),
            shims: ShimRegistry::new(),
            log,
        }
    }

    pub fn exec(&self, config: ExecConfig) -> EfiImageExec<'_, FakeBoot> {
        EfiImageExec::new(&self.boot, &self.snp, &self.aux, &self.images)
            .with_registry(&self.shims)
            .with_config(config)
    }

    /// Register `shim` with an explicit second stage name
    pub fn register_shim(&self, name: &str, second_stage: Option<&str>) -> ImageRef {
        let shim = Image::new(name, pe_image());
        self.shims
            .set_shim(Some(&shim), second_stage, &ExecConfig::new())
            .expect("set_shim");
        shim
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }
}
