//! Device list bookkeeping: last-known-good lists, selections, capture formats.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::domain::{CaptureFormat, DeviceId, DeviceKind, MediaDevice};

/// Outcome of replacing a device list with a fresh enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    Unchanged,
    Selected(MediaDevice),
    Cleared,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCatalog {
    lists: BTreeMap<DeviceKind, Vec<MediaDevice>>,
    selected: BTreeMap<DeviceKind, DeviceId>,
    capture_formats: Vec<CaptureFormat>,
    selected_format: Option<CaptureFormat>,
}

impl DeviceCatalog {
    pub fn devices(&self, kind: DeviceKind) -> &[MediaDevice] {
        self.lists.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn selected(&self, kind: DeviceKind) -> Option<&MediaDevice> {
        let id = self.selected.get(&kind)?;
        self.devices(kind).iter().find(|device| &device.id == id)
    }

    pub fn capture_formats(&self) -> &[CaptureFormat] {
        &self.capture_formats
    }

    pub fn selected_format(&self) -> Option<CaptureFormat> {
        self.selected_format
    }

    /// Replaces the list for `kind`. The current selection survives when its id
    /// is still enumerated; otherwise the first device takes over.
    pub fn apply_enumeration(
        &mut self,
        kind: DeviceKind,
        devices: Vec<MediaDevice>,
    ) -> SelectionChange {
        let previous = self.selected.get(&kind).cloned();
        let kept = previous
            .as_ref()
            .is_some_and(|id| devices.iter().any(|device| &device.id == id));
        let fallback = devices.first().cloned();
        self.lists.insert(kind, devices);

        if kept {
            return SelectionChange::Unchanged;
        }

        match fallback {
            Some(device) => {
                self.selected.insert(kind, device.id.clone());
                SelectionChange::Selected(device)
            }
            None => {
                self.selected.remove(&kind);
                if kind == DeviceKind::VideoCapture {
                    self.clear_capture_formats();
                }
                if previous.is_some() {
                    SelectionChange::Cleared
                } else {
                    SelectionChange::Unchanged
                }
            }
        }
    }

    /// Selects a device already present in the list for `kind`.
    pub fn select(&mut self, kind: DeviceKind, device_id: &DeviceId) -> Option<MediaDevice> {
        let device = self
            .devices(kind)
            .iter()
            .find(|device| &device.id == device_id)
            .cloned()?;
        self.selected.insert(kind, device.id.clone());
        if kind == DeviceKind::VideoCapture {
            self.clear_capture_formats();
        }
        Some(device)
    }

    /// Stores the formats of the selected video capture device and picks one:
    /// the preferred resolution and frame rate, then the preferred resolution
    /// at any rate, then the first format.
    pub fn apply_capture_formats(
        &mut self,
        formats: Vec<CaptureFormat>,
        preferred_resolution: Option<(u32, u32)>,
        preferred_frame_rate: Option<u32>,
    ) -> Option<CaptureFormat> {
        let exact = formats.iter().copied().find(|format| {
            Some(format.resolution()) == preferred_resolution
                && Some(format.frame_rate) == preferred_frame_rate
        });
        let same_resolution = || {
            formats
                .iter()
                .copied()
                .find(|format| Some(format.resolution()) == preferred_resolution)
        };
        let chosen = exact
            .or_else(same_resolution)
            .or_else(|| formats.first().copied());

        self.capture_formats = formats;
        self.selected_format = chosen;
        chosen
    }

    pub fn select_capture_format(&mut self, format: CaptureFormat) -> bool {
        if !self.capture_formats.contains(&format) {
            return false;
        }
        self.selected_format = Some(format);
        true
    }

    fn clear_capture_formats(&mut self) {
        self.capture_formats.clear();
        self.selected_format = None;
    }
}
