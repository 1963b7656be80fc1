//! Shared virtual display manager.
//!
//! One virtual display at most, shared by every consumer that needs host
//! pixels: outgoing streams, the login display, unlock flows, and desktop
//! streaming. The display lives exactly as long as its consumer set is
//! non-empty.
//!
//! All operations run on a single owning task; the manager is not `Sync`
//! and never needs to be; serializing lifecycle transitions is what makes
//! the recreate/update rules coherent.
//!
//! # Mode rules
//!
//! - Refresh-rate or colorspace mismatch always recreates; the platform
//!   cannot change either in place.
//! - Resolution changes are attempted in place first, recreating only on
//!   failure. Changes within 2 px are ignored.
//! - Creation tries HiDPI 2× first and falls back to 1× when Retina
//!   activation fails its ready-check.
//! - Each creation alternates between two deterministic serial slots per
//!   colorspace, bounding ColorSync profile churn.

use std::collections::HashMap;

use mirage_proto::payloads::stream::ColorSpace;

use crate::error::DisplayError;

/// Resize delta treated as a no-op.
const RESIZE_TOLERANCE: u32 = 2;

/// A logical user of the shared display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayConsumer {
    /// A client stream.
    Stream(u16),
    /// The login display surface.
    LoginDisplay,
    /// Screen unlock flow.
    Unlock,
    /// Whole-desktop streaming.
    DesktopStream,
}

/// Mode a consumer wants from the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Pixel resolution.
    pub resolution: (u32, u32),
    /// Refresh rate in Hz.
    pub refresh_rate: u32,
    /// Color space.
    pub color_space: ColorSpace,
}

/// Creation request handed to the platform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayModeRequest {
    /// Pixel resolution.
    pub resolution: (u32, u32),
    /// Refresh rate in Hz.
    pub refresh_rate: u32,
    /// Color space.
    pub color_space: ColorSpace,
    /// HiDPI factor (2 for Retina, 1 for native).
    pub hidpi_factor: u32,
    /// Deterministic serial slot (0 or 1) for this colorspace.
    pub serial_slot: u8,
}

/// Identifiers of a created platform display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedDisplay {
    /// Platform display identifier.
    pub display_id: u64,
    /// Window-server space backing the display.
    pub space_id: u64,
}

/// Platform seam for virtual display lifecycle (CGVirtualDisplay-class).
pub trait DisplayProvider {
    /// Create a display in the requested mode.
    fn create(&mut self, request: &DisplayModeRequest) -> Result<CreatedDisplay, DisplayError>;

    /// Tear down a display.
    fn destroy(&mut self, display_id: u64);

    /// Change resolution in place; `Err` means the caller must recreate.
    fn update_resolution(
        &mut self,
        display_id: u64,
        width: u32,
        height: u32,
    ) -> Result<(), DisplayError>;

    /// Confirm the paired logical+pixel mode is active in the platform
    /// display list.
    fn is_mode_ready(&mut self, display_id: u64, logical: (u32, u32), pixel: (u32, u32)) -> bool;
}

/// Live display state owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedDisplayContext {
    /// Platform display identifier.
    pub display_id: u64,
    /// Window-server space identifier.
    pub space_id: u64,
    /// Current pixel resolution.
    pub resolution: (u32, u32),
    /// Refresh rate in Hz.
    pub refresh_rate: u32,
    /// Color space.
    pub color_space: ColorSpace,
    /// HiDPI factor the creation settled on.
    pub hidpi_factor: u32,
    /// Serial slot used at creation.
    pub serial_slot: u8,
}

/// Reference-counted owner of the single shared virtual display.
#[derive(Debug)]
pub struct SharedVirtualDisplayManager<P: DisplayProvider> {
    provider: P,
    shared: Option<ManagedDisplayContext>,
    consumers: HashMap<DisplayConsumer, DisplaySettings>,
    next_serial_slot: HashMap<ColorSpace, u8>,
}

impl<P: DisplayProvider> SharedVirtualDisplayManager<P> {
    /// Create a manager over a platform provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            shared: None,
            consumers: HashMap::new(),
            next_serial_slot: HashMap::new(),
        }
    }

    /// Whether a display currently exists.
    #[must_use]
    pub fn has_active_display(&self) -> bool {
        self.shared.is_some()
    }

    /// Current consumer count.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Current display context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&ManagedDisplayContext> {
        self.shared.as_ref()
    }

    /// Acquire the display for a consumer, creating or adjusting it to the
    /// requested settings.
    ///
    /// # Errors
    ///
    /// - [`DisplayError::CreationFailed`] / [`DisplayError::ReadyCheckFailed`]
    ///   when the platform cannot produce the mode at either HiDPI factor
    pub fn acquire(
        &mut self,
        consumer: DisplayConsumer,
        settings: DisplaySettings,
    ) -> Result<ManagedDisplayContext, DisplayError> {
        let context = match self.shared {
            None => {
                let created = self.create_display(settings)?;
                self.shared = Some(created);
                created
            },
            Some(current) => {
                if current.refresh_rate != settings.refresh_rate
                    || current.color_space != settings.color_space
                {
                    // Neither changes in place; recreate.
                    self.destroy_current();
                    let created = self.create_display(settings)?;
                    self.shared = Some(created);
                    created
                } else {
                    self.apply_resolution(current, settings)?
                }
            },
        };

        self.consumers.insert(consumer, settings);
        Ok(context)
    }

    /// Release a consumer's hold; the display is destroyed when the last
    /// consumer releases.
    ///
    /// # Errors
    ///
    /// - [`DisplayError::UnknownConsumer`] if the consumer never acquired
    pub fn release(&mut self, consumer: DisplayConsumer) -> Result<(), DisplayError> {
        if self.consumers.remove(&consumer).is_none() {
            return Err(DisplayError::UnknownConsumer);
        }
        if self.consumers.is_empty() {
            self.destroy_current();
        }
        Ok(())
    }

    fn apply_resolution(
        &mut self,
        current: ManagedDisplayContext,
        settings: DisplaySettings,
    ) -> Result<ManagedDisplayContext, DisplayError> {
        let (want_w, want_h) = settings.resolution;
        let (have_w, have_h) = current.resolution;
        if want_w.abs_diff(have_w) <= RESIZE_TOLERANCE && want_h.abs_diff(have_h) <= RESIZE_TOLERANCE
        {
            return Ok(current);
        }

        match self.provider.update_resolution(current.display_id, want_w, want_h) {
            Ok(()) => {
                let updated =
                    ManagedDisplayContext { resolution: settings.resolution, ..current };
                self.shared = Some(updated);
                Ok(updated)
            },
            Err(err) => {
                tracing::debug!(%err, "in-place resolution change failed, recreating");
                self.destroy_current();
                let created = self.create_display(settings)?;
                self.shared = Some(created);
                Ok(created)
            },
        }
    }

    /// Create a display, preferring HiDPI 2× with a 1× fallback when Retina
    /// activation fails validation.
    fn create_display(
        &mut self,
        settings: DisplaySettings,
    ) -> Result<ManagedDisplayContext, DisplayError> {
        let serial_slot = self.take_serial_slot(settings.color_space);

        let mut last_error = None;
        for hidpi_factor in [2u32, 1] {
            let request = DisplayModeRequest {
                resolution: settings.resolution,
                refresh_rate: settings.refresh_rate,
                color_space: settings.color_space,
                hidpi_factor,
                serial_slot,
            };
            match self.provider.create(&request) {
                Err(err) => last_error = Some(err),
                Ok(created) => {
                    let (w, h) = settings.resolution;
                    let logical = (w / hidpi_factor, h / hidpi_factor);
                    if self.provider.is_mode_ready(created.display_id, logical, (w, h)) {
                        return Ok(ManagedDisplayContext {
                            display_id: created.display_id,
                            space_id: created.space_id,
                            resolution: settings.resolution,
                            refresh_rate: settings.refresh_rate,
                            color_space: settings.color_space,
                            hidpi_factor,
                            serial_slot,
                        });
                    }
                    tracing::debug!(hidpi_factor, "mode ready-check failed");
                    self.provider.destroy(created.display_id);
                    last_error = Some(DisplayError::ReadyCheckFailed {
                        width: logical.0,
                        height: logical.1,
                    });
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| DisplayError::CreationFailed("no HiDPI factor accepted".into())))
    }

    fn destroy_current(&mut self) {
        if let Some(context) = self.shared.take() {
            self.provider.destroy(context.display_id);
        }
    }

    /// Alternate between slots 0 and 1 per colorspace.
    fn take_serial_slot(&mut self, color_space: ColorSpace) -> u8 {
        let slot = self.next_serial_slot.entry(color_space).or_insert(0);
        let current = *slot;
        *slot ^= 1;
        current
    }
}
