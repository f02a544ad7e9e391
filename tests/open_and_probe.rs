//! End-to-end open-sequence scenarios (spec.md §8): probing a well-behaved
//! device, a zero-storages device that needs a retry ladder, and a device
//! that reports a stale session on first `OpenSession`.

use std::sync::Arc;

use async_trait::async_trait;

use mtp_host::config::EnvOverrides;
use mtp_host::error::MtpResult;
use mtp_host::journal::JsonFileJournal;
use mtp_host::profile::LearnedProfileStore;
use mtp_host::quirks::QuirkDatabase;
use mtp_host::session::{open_session, DeviceSession, SessionConfig};
use mtp_host::transport::mock::MockTransport;
use mtp_host::transport::{TransportOpener, UsbTransport};
use mtp_host::types::{DeviceSummary, InterfaceDescriptor};
use mtp_host::wire::container::{self, ParamContainer};
use mtp_host::wire::strings::encode_ptp_string;
use mtp_host::wire::{ContainerType, OperationCode};

fn descriptor() -> InterfaceDescriptor {
    InterfaceDescriptor {
        interface_number: 0,
        class: 6,
        subclass: 1,
        protocol: 1,
        bulk_in_ep: 0x81,
        bulk_out_ep: 0x01,
        interrupt_in_ep: Some(0x82),
    }
}

fn pixel_summary() -> DeviceSummary {
    DeviceSummary {
        vid: 0x18D1,
        pid: 0x4EE1,
        bus: 1,
        address: 5,
        manufacturer: Some("Google".to_string()),
        model: Some("Pixel 7".to_string()),
        interface: InterfaceDescriptor {
            class: 0xFF,
            subclass: 0xFF,
            protocol: 0x00,
            ..descriptor()
        },
        bcd_device: None,
    }
}

/// Always hands out the same scripted [`MockTransport`], ignoring the
/// summary — good enough for tests that don't exercise real enumeration.
struct FixedOpener(Arc<MockTransport>);

#[async_trait]
impl TransportOpener for FixedOpener {
    async fn open(&self, _summary: &DeviceSummary, _io_timeout_ms: u64) -> MtpResult<Box<dyn UsbTransport>> {
        Ok(Box::new(ClonedTransport(self.0.clone())))
    }
}

/// `Box<dyn UsbTransport>` needs an owned value; this just forwards to the
/// shared `Arc<MockTransport>` so the test retains a handle to script it.
struct ClonedTransport(Arc<MockTransport>);

#[async_trait]
impl UsbTransport for ClonedTransport {
    async fn bulk_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize> {
        self.0.bulk_in(buf, timeout_ms).await
    }
    async fn bulk_out(&self, data: &[u8], timeout_ms: u64) -> MtpResult<usize> {
        self.0.bulk_out(data, timeout_ms).await
    }
    async fn interrupt_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize> {
        self.0.interrupt_in(buf, timeout_ms).await
    }
    async fn reset_device(&self) -> MtpResult<()> {
        self.0.reset_device().await
    }
    async fn reset_endpoints(&self) -> MtpResult<()> {
        self.0.reset_endpoints().await
    }
    fn interface_descriptor(&self) -> &InterfaceDescriptor {
        self.0.interface_descriptor()
    }
    async fn close(&self) -> MtpResult<()> {
        self.0.close().await
    }
}

fn push_response(mock: &MockTransport, code: u16, txid: u32, params: Vec<u32>) {
    let resp = ParamContainer { kind: ContainerType::Response, code, txid, params };
    mock.push_inbound(resp.encode().unwrap());
}

fn push_data_then_ok(mock: &MockTransport, code: u16, txid: u32, payload: &[u8]) {
    let mut data = container::encode_data_header(code, txid, payload.len() as u64).unwrap();
    data.extend_from_slice(payload);
    mock.push_inbound(data);
    push_response(mock, 0x2001, txid, vec![]);
}

fn device_info_payload(manufacturer: &str, model: &str, operations: &[u16], events: &[u16]) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};

    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(100).unwrap(); // standard version
    buf.write_u32::<LittleEndian>(0).unwrap(); // vendor extension id
    buf.write_u16::<LittleEndian>(0).unwrap(); // vendor extension version
    buf.extend_from_slice(&encode_ptp_string("").unwrap()); // vendor extension desc
    buf.write_u16::<LittleEndian>(0).unwrap(); // functional mode

    let mut write_u16_array = |values: &[u16]| {
        buf.write_u32::<LittleEndian>(values.len() as u32).unwrap();
        for v in values {
            buf.write_u16::<LittleEndian>(*v).unwrap();
        }
    };
    write_u16_array(operations);
    write_u16_array(events);
    write_u16_array(&[]); // device properties
    write_u16_array(&[]); // object formats (capture)
    write_u16_array(&[]); // object formats (playback)

    buf.extend_from_slice(&encode_ptp_string(manufacturer).unwrap());
    buf.extend_from_slice(&encode_ptp_string(model).unwrap());
    buf.extend_from_slice(&encode_ptp_string("1.0").unwrap());
    buf.extend_from_slice(&encode_ptp_string("SN123").unwrap());
    buf
}

fn storage_ids_payload(ids: &[u32]) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(ids.len() as u32).unwrap();
    for id in ids {
        buf.write_u32::<LittleEndian>(*id).unwrap();
    }
    buf
}

fn test_config(mock: Arc<MockTransport>, dir: &std::path::Path) -> SessionConfig {
    SessionConfig {
        opener: Arc::new(FixedOpener(mock)),
        journal: Arc::new(JsonFileJournal::new(dir.join("journal"))),
        profile_store: Arc::new(LearnedProfileStore::new(dir.join("profiles"))),
        quirk_db: QuirkDatabase::empty(),
        overrides: EnvOverrides::default(),
    }
}

/// Scenario 1: a Pixel 7 with PropList enumeration and Partial64 reads opens
/// cleanly and reports its single storage.
#[tokio::test]
async fn probes_pixel_like_device_and_resolves_fast_strategies() {
    let mock = Arc::new(MockTransport::new(descriptor()));
    // Preemptive CloseSession (txid=1, result ignored by the open sequence).
    push_response(&mock, 0x2003, 1, vec![]);
    // OpenSession
    push_response(&mock, 0x2001, 2, vec![]);
    // GetDeviceInfo
    let info = device_info_payload(
        "Google",
        "Pixel 7",
        &[OperationCode::GetObjectPropList.into(), OperationCode::GetPartialObject64.into()],
        &[0x4002],
    );
    push_data_then_ok(&mock, OperationCode::GetDeviceInfo.into(), 3, &info);

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(mock, dir.path());
    let opened = open_session(&config, &pixel_summary()).await.unwrap();

    assert_eq!(opened.device_info.manufacturer, "Google");
    assert_eq!(opened.device_info.model, "Pixel 7");
    assert!(opened.policy.tuning.flags.supports_get_object_prop_list);
    assert!(opened.policy.tuning.flags.supports_get_partial_object64);
    assert_eq!(opened.policy.enumeration, mtp_host::config::EnumerationStrategy::PropList);
    assert_eq!(opened.policy.read, mtp_host::config::ReadStrategy::Partial64);
}

/// Scenario 4: the device reports zero storages on its first three polls,
/// then a real storage on the fourth; `storages()` must not surface an error.
#[tokio::test]
async fn zero_storages_retries_then_succeeds() {
    let mock = Arc::new(MockTransport::new(descriptor()));
    push_response(&mock, 0x2003, 1, vec![]); // preemptive CloseSession, ignored
    push_response(&mock, 0x2001, 2, vec![]); // OpenSession
    push_data_then_ok(&mock, OperationCode::GetDeviceInfo.into(), 3, &device_info_payload("Acme", "Phone", &[], &[]));

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(mock.clone(), dir.path());
    let opened = open_session(&config, &pixel_summary()).await.unwrap();
    let journal = config.journal.clone();
    let profile_store = config.profile_store.clone();
    let session = DeviceSession::spawn(opened, journal, profile_store);

    for txid in [4u32, 5, 6] {
        push_data_then_ok(&mock, OperationCode::GetStorageIDs.into(), txid, &storage_ids_payload(&[]));
    }
    push_data_then_ok(&mock, OperationCode::GetStorageIDs.into(), 7, &storage_ids_payload(&[0x00010001]));

    let mut storage_info = Vec::new();
    use byteorder::{LittleEndian, WriteBytesExt};
    storage_info.write_u16::<LittleEndian>(0).unwrap();
    storage_info.write_u16::<LittleEndian>(0).unwrap();
    storage_info.write_u16::<LittleEndian>(0).unwrap();
    storage_info.write_u64::<LittleEndian>(1_000_000).unwrap();
    storage_info.write_u64::<LittleEndian>(500_000).unwrap();
    storage_info.write_u32::<LittleEndian>(0).unwrap();
    storage_info.extend_from_slice(&encode_ptp_string("Internal").unwrap());
    push_data_then_ok(&mock, OperationCode::GetStorageInfo.into(), 8, &storage_info);

    let storages = session.storages().await.unwrap();
    assert_eq!(storages.len(), 1);
    assert_eq!(storages[0].storage_id, 0x00010001);
}

/// Scenario 5: the device reports `SessionAlreadyOpen` on the first
/// `OpenSession`; the open sequence closes and retries once and proceeds.
#[tokio::test]
async fn session_already_open_is_recovered_by_close_then_retry() {
    let mock = Arc::new(MockTransport::new(descriptor()));
    push_response(&mock, 0x2003, 1, vec![]); // preemptive CloseSession, ignored
    push_response(&mock, 0x201E, 2, vec![]); // OpenSession -> SessionAlreadyOpen
    push_response(&mock, 0x2001, 3, vec![]); // retry's CloseSession, ignored
    push_response(&mock, 0x2001, 4, vec![]); // OpenSession retry -> Ok
    push_data_then_ok(&mock, OperationCode::GetDeviceInfo.into(), 5, &device_info_payload("Acme", "Phone", &[], &[]));

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(mock, dir.path());
    let opened = open_session(&config, &pixel_summary()).await.unwrap();
    assert_eq!(opened.device_info.manufacturer, "Acme");
}
