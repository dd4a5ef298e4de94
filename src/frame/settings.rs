use bytes::{Buf, BufMut, Bytes};

use super::{Flags, Head, Kind, StreamId};
use crate::error::FrameError;

/// Recognized SETTINGS identifiers (RFC 7540 §6.5.2, RFC 8441 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    EnableConnectProtocol,
    Unknown(u16),
}

impl SettingId {
    fn from_u16(id: u16) -> SettingId {
        match id {
            1 => SettingId::HeaderTableSize,
            2 => SettingId::EnablePush,
            3 => SettingId::MaxConcurrentStreams,
            4 => SettingId::InitialWindowSize,
            5 => SettingId::MaxFrameSize,
            6 => SettingId::MaxHeaderListSize,
            8 => SettingId::EnableConnectProtocol,
            other => SettingId::Unknown(other),
        }
    }

    fn to_u16(self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 1,
            SettingId::EnablePush => 2,
            SettingId::MaxConcurrentStreams => 3,
            SettingId::InitialWindowSize => 4,
            SettingId::MaxFrameSize => 5,
            SettingId::MaxHeaderListSize => 6,
            SettingId::EnableConnectProtocol => 8,
            SettingId::Unknown(v) => v,
        }
    }
}

/// A SETTINGS frame: either the ACK (empty payload, no parameters) or a
/// list of `(id, value)` pairs (RFC 7540 §6.5).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    ack: bool,
    header_table_size: Option<u32>,
    enable_push: Option<u32>,
    max_concurrent_streams: Option<u32>,
    initial_window_size: Option<u32>,
    max_frame_size: Option<u32>,
    max_header_list_size: Option<u32>,
    enable_connect_protocol: Option<u32>,
}

impl Settings {
    pub fn ack() -> Settings {
        Settings {
            ack: true,
            ..Default::default()
        }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn header_table_size(&self) -> Option<u32> {
        self.header_table_size
    }

    pub fn enable_push(&self) -> Option<u32> {
        self.enable_push
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn initial_window_size(&self) -> Option<u32> {
        self.initial_window_size
    }

    pub fn max_frame_size(&self) -> Option<u32> {
        self.max_frame_size
    }

    pub fn max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    pub fn enable_connect_protocol(&self) -> Option<u32> {
        self.enable_connect_protocol
    }

    pub fn set_initial_window_size(&mut self, v: Option<u32>) -> &mut Self {
        self.initial_window_size = v;
        self
    }

    pub fn set_max_frame_size(&mut self, v: Option<u32>) -> &mut Self {
        self.max_frame_size = v;
        self
    }

    pub fn set_max_header_list_size(&mut self, v: Option<u32>) -> &mut Self {
        self.max_header_list_size = v;
        self
    }

    pub fn set_max_concurrent_streams(&mut self, v: Option<u32>) -> &mut Self {
        self.max_concurrent_streams = v;
        self
    }

    pub fn set_enable_push(&mut self, v: Option<u32>) -> &mut Self {
        self.enable_push = v;
        self
    }

    pub fn set_enable_connect_protocol(&mut self, v: Option<u32>) -> &mut Self {
        self.enable_connect_protocol = v;
        self
    }

    fn set(&mut self, id: SettingId, value: u32) -> Result<(), FrameError> {
        match id {
            SettingId::HeaderTableSize => self.header_table_size = Some(value),
            SettingId::EnablePush => self.enable_push = Some(value),
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingId::InitialWindowSize => self.initial_window_size = Some(value),
            SettingId::MaxFrameSize => {
                if !(super::DEFAULT_MAX_FRAME_SIZE..=super::MAX_ALLOWED_FRAME_SIZE)
                    .contains(&value)
                {
                    return Err(FrameError::TooLarge);
                }
                self.max_frame_size = Some(value);
            }
            SettingId::MaxHeaderListSize => self.max_header_list_size = Some(value),
            SettingId::EnableConnectProtocol => self.enable_connect_protocol = Some(value),
            SettingId::Unknown(_) => {} // ignored per RFC 7540 §6.5.2
        }
        Ok(())
    }

    pub fn load(head: Head, mut payload: Bytes) -> Result<Settings, FrameError> {
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        if head.flags().contains(Flags::ACK) {
            if !payload.is_empty() {
                return Err(FrameError::BadSettingsLength);
            }
            return Ok(Settings::ack());
        }
        if payload.len() % 6 != 0 {
            return Err(FrameError::BadSettingsLength);
        }

        let mut settings = Settings::default();
        while payload.has_remaining() {
            let id = SettingId::from_u16(payload.get_u16());
            let value = payload.get_u32();
            settings.set(id, value)?;
        }
        Ok(settings)
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        if self.ack {
            let head = Head::new(Kind::Settings, Flags::ACK, StreamId::ZERO);
            head.encode(0, dst);
            return;
        }

        let mut params = Vec::new();
        if let Some(v) = self.header_table_size {
            params.push((SettingId::HeaderTableSize, v));
        }
        if let Some(v) = self.enable_push {
            params.push((SettingId::EnablePush, v));
        }
        if let Some(v) = self.max_concurrent_streams {
            params.push((SettingId::MaxConcurrentStreams, v));
        }
        if let Some(v) = self.initial_window_size {
            params.push((SettingId::InitialWindowSize, v));
        }
        if let Some(v) = self.max_frame_size {
            params.push((SettingId::MaxFrameSize, v));
        }
        if let Some(v) = self.max_header_list_size {
            params.push((SettingId::MaxHeaderListSize, v));
        }
        if let Some(v) = self.enable_connect_protocol {
            params.push((SettingId::EnableConnectProtocol, v));
        }

        let head = Head::new(Kind::Settings, Flags::empty(), StreamId::ZERO);
        head.encode(params.len() * 6, dst);
        for (id, value) in params {
            dst.put_u16(id.to_u16());
            dst.put_u32(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_client_preface_settings() {
        let mut s = Settings::default();
        s.set_enable_push(Some(0)).set_initial_window_size(Some(1_048_576));

        let mut buf = BytesMut::new();
        s.encode(&mut buf);
        let (head, len) = Head::parse(&buf).unwrap();
        let payload = buf.split_off(9).split_to(len as usize).freeze();
        let loaded = Settings::load(head, payload).unwrap();

        assert_eq!(loaded.enable_push(), Some(0));
        assert_eq!(loaded.initial_window_size(), Some(1_048_576));
        assert!(!loaded.is_ack());
    }

    #[test]
    fn rejects_length_not_multiple_of_six() {
        let head = Head::new(Kind::Settings, Flags::empty(), StreamId::ZERO);
        let payload = Bytes::from_static(&[0; 5]);
        assert!(matches!(
            Settings::load(head, payload),
            Err(FrameError::BadSettingsLength)
        ));
    }

    #[test]
    fn unknown_identifiers_are_ignored() {
        let head = Head::new(Kind::Settings, Flags::empty(), StreamId::ZERO);
        let mut payload = Vec::new();
        payload.put_u16(0xFFF0);
        payload.put_u32(7);
        let loaded = Settings::load(head, Bytes::from(payload)).unwrap();
        assert_eq!(loaded.max_frame_size(), None);
    }
}
