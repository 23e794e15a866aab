//! SETTINGS parameters (RFC 9113 §6.5)

use super::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// One parameter on the wire: 16-bit identifier, 32-bit value
pub const SETTING_ENTRY_SIZE: usize = 6;

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
/// Also the smallest SETTINGS_MAX_FRAME_SIZE a peer may announce
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
/// Header list limit a server announces; also bounds header block reassembly
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 65_536;

const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Parameter identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// Identifiers in wire order; index + 1 is the identifier
const PARAMETERS: [(SettingsParameter, &str); 6] = [
    (SettingsParameter::HeaderTableSize, "HEADER_TABLE_SIZE"),
    (SettingsParameter::EnablePush, "ENABLE_PUSH"),
    (SettingsParameter::MaxConcurrentStreams, "MAX_CONCURRENT_STREAMS"),
    (SettingsParameter::InitialWindowSize, "INITIAL_WINDOW_SIZE"),
    (SettingsParameter::MaxFrameSize, "MAX_FRAME_SIZE"),
    (SettingsParameter::MaxHeaderListSize, "MAX_HEADER_LIST_SIZE"),
];

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// `None` for identifiers this crate does not know; those are ignored
    pub fn from_u16(value: u16) -> Option<Self> {
        let index = usize::from(value).checked_sub(1)?;
        PARAMETERS.get(index).map(|(param, _)| *param)
    }

    pub fn name(&self) -> &'static str {
        PARAMETERS[*self as usize - 1].1
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SETTINGS_{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// Parameters carried by one SETTINGS frame, or the accumulated state of a
/// peer
///
/// `None` means the parameter was never sent and its protocol default
/// applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    /// Unlimited when absent
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    /// Advisory; unlimited when absent
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    /// What the server announces right after the client preface
    ///
    /// ENABLE_PUSH is a client-only parameter and is left out.
    pub fn server_preface() -> Self {
        Settings {
            header_table_size: Some(DEFAULT_HEADER_TABLE_SIZE),
            max_concurrent_streams: Some(100),
            initial_window_size: Some(DEFAULT_INITIAL_WINDOW_SIZE),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            max_header_list_size: Some(DEFAULT_MAX_HEADER_LIST_SIZE),
            ..Settings::default()
        }
    }

    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Present parameters as wire pairs, in identifier order
    fn entries(&self) -> impl Iterator<Item = (SettingsParameter, u32)> {
        [
            (SettingsParameter::HeaderTableSize, self.header_table_size),
            (SettingsParameter::EnablePush, self.enable_push.map(u32::from)),
            (SettingsParameter::MaxConcurrentStreams, self.max_concurrent_streams),
            (SettingsParameter::InitialWindowSize, self.initial_window_size),
            (SettingsParameter::MaxFrameSize, self.max_frame_size),
            (SettingsParameter::MaxHeaderListSize, self.max_header_list_size),
        ]
        .into_iter()
        .filter_map(|(param, value)| value.map(|value| (param, value)))
    }

    /// Store one wire value, checking the ranges §6.5.2 mandates
    fn apply(&mut self, param: SettingsParameter, value: u32) -> Result<()> {
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = Some(value),
            SettingsParameter::EnablePush => {
                if value > 1 {
                    return Err(Error::Protocol(format!(
                        "ENABLE_PUSH must be 0 or 1, got {}",
                        value
                    )));
                }
                self.enable_push = Some(value == 1);
            }
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingsParameter::InitialWindowSize => {
                if value > MAX_WINDOW_SIZE {
                    return Err(Error::FlowControl(format!(
                        "INITIAL_WINDOW_SIZE {} above 2^31-1",
                        value
                    )));
                }
                self.initial_window_size = Some(value);
            }
            SettingsParameter::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(Error::InvalidSettings(format!(
                        "MAX_FRAME_SIZE {} outside {}..={}",
                        value, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE
                    )));
                }
                self.max_frame_size = Some(value);
            }
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = Some(value),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut scratch = Settings::default();
        self.entries().try_for_each(|(param, value)| scratch.apply(param, value))
    }

    /// Overlay the parameters present in `update`
    pub fn merge(&mut self, update: &Settings) {
        for (param, value) in update.entries() {
            // values in `update` are already range-checked
            let _ = self.apply(param, value);
        }
    }

    /// Append the present parameters as a SETTINGS payload
    pub fn encode(&self, buf: &mut BytesMut) {
        for (param, value) in self.entries() {
            buf.put_u16(param.as_u16());
            buf.put_u32(value);
        }
    }

    /// Parse a SETTINGS payload; unknown identifiers are skipped
    pub fn decode(mut payload: &[u8]) -> Result<Settings> {
        if payload.len() % SETTING_ENTRY_SIZE != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload of {} bytes",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        while payload.has_remaining() {
            let id = payload.get_u16();
            let value = payload.get_u32();
            if let Some(param) = SettingsParameter::from_u16(id) {
                settings.apply(param, value)?;
            }
        }
        Ok(settings)
    }
}

/// Builds the settings a local endpoint announces
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_table_matches_identifiers() {
        for (index, (param, _)) in PARAMETERS.iter().enumerate() {
            assert_eq!(param.as_u16() as usize, index + 1);
        }
        assert_eq!(SettingsParameter::from_u16(0x0), None);
        assert_eq!(
            SettingsParameter::from_u16(0x4),
            Some(SettingsParameter::InitialWindowSize)
        );
        assert_eq!(SettingsParameter::from_u16(0x7), None);
        assert_eq!(
            SettingsParameter::MaxFrameSize.to_string(),
            "SETTINGS_MAX_FRAME_SIZE (0x5)"
        );
    }

    #[test]
    fn test_server_preface_omits_push() {
        let settings = Settings::server_preface();
        assert_eq!(settings.enable_push, None);
        assert_eq!(settings.get_max_concurrent_streams(), Some(100));
        assert_eq!(settings.get_initial_window_size(), 65535);
        assert_eq!(settings.get_max_frame_size(), 16384);
        assert_eq!(settings.get_max_header_list_size(), Some(65536));
    }

    #[test]
    fn test_builder_validates_ranges() {
        assert!(SettingsBuilder::new()
            .initial_window_size(65535)
            .max_frame_size(16384)
            .build()
            .is_ok());

        let err = SettingsBuilder::new().initial_window_size(0x8000_0000).build();
        assert!(matches!(err, Err(Error::FlowControl(_))));

        assert!(SettingsBuilder::new().max_frame_size(1024).build().is_err());
        assert!(SettingsBuilder::new().max_frame_size(16_777_216).build().is_err());
    }

    #[test]
    fn test_merge_keeps_unset_values() {
        let mut current = SettingsBuilder::new()
            .header_table_size(4096)
            .enable_push(true)
            .build()
            .unwrap();

        let update = SettingsBuilder::new()
            .header_table_size(8192)
            .max_concurrent_streams(100)
            .build()
            .unwrap();

        current.merge(&update);

        assert_eq!(current.get_header_table_size(), 8192);
        assert!(current.get_enable_push());
        assert_eq!(current.get_max_concurrent_streams(), Some(100));
    }

    #[test]
    fn test_decode_encoded_preface() {
        let mut buf = BytesMut::new();
        Settings::server_preface().encode(&mut buf);
        assert_eq!(buf.len(), 5 * SETTING_ENTRY_SIZE);
        assert_eq!(Settings::decode(&buf).unwrap(), Settings::server_preface());
    }

    #[test]
    fn test_decode_skips_unknown_identifiers() {
        let payload = [0x00, 0x08, 0, 0, 0, 1, 0x00, 0x04, 0, 0, 0x10, 0];
        let settings = Settings::decode(&payload).unwrap();
        assert_eq!(settings.initial_window_size, Some(4096));
        assert_eq!(settings.header_table_size, None);
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        assert!(matches!(Settings::decode(&[0, 0, 0]), Err(Error::FrameSize(_))));
        assert!(matches!(
            Settings::decode(&[0x00, 0x02, 0, 0, 0, 2]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Settings::decode(&[0x00, 0x04, 0x80, 0, 0, 0]),
            Err(Error::FlowControl(_))
        ));
        assert!(matches!(
            Settings::decode(&[0x00, 0x05, 0, 0, 0x10, 0]),
            Err(Error::InvalidSettings(_))
        ));
    }
}
