//! Integration tests for opening, commanding and tearing down sessions.

mod common;

use common::{MINI_SERIAL, MK2_SERIAL, assert_clean_teardown, mock_with, open_session};
use rstest::rstest;
use screamdeck::mock::MockCall;
use screamdeck::{DeckSession, Directory, Error, PollerState, SessionConfig};
use screamdeck_core::{DeviceType, PixelFormat};
use std::time::Duration;

// ============================================================================
// Open
// ============================================================================

#[test]
fn test_open_attached_deck() {
    let (session, mock) = open_session(DeviceType::Mk2, MK2_SERIAL);

    assert_eq!(session.serial_number(), MK2_SERIAL);
    let info = session.type_info();
    assert_eq!(info.device_type, DeviceType::Mk2);
    assert_eq!((info.columns, info.rows), (5, 3));
    assert_eq!(mock.open_count(), 1);

    session.close();
}

#[test]
fn test_open_missing_deck_returns_none() {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);

    let session = DeckSession::open(driver, DeviceType::Mini, "NOT-ATTACHED").unwrap();
    assert!(session.is_none());
    assert_eq!(mock.open_count(), 0);
    assert_eq!(mock.free_count(), 0);
}

#[test]
fn test_open_busy_deck_returns_none() {
    let (driver, _mock) = mock_with(DeviceType::Mini, MINI_SERIAL);

    let first = DeckSession::open(driver.clone(), DeviceType::Mini, MINI_SERIAL)
        .unwrap()
        .unwrap();
    assert!(
        DeckSession::open(driver, DeviceType::Mini, MINI_SERIAL)
            .unwrap()
            .is_none()
    );
    first.close();
}

#[rstest]
#[case::wildcard_type(DeviceType::None, MINI_SERIAL)]
#[case::empty_serial(DeviceType::Mini, "")]
#[case::blank_serial(DeviceType::Mini, "   ")]
#[case::nul_in_serial(DeviceType::Mini, "BL21\0K1A")]
fn test_open_rejects_invalid_arguments(#[case] device_type: DeviceType, #[case] serial: &str) {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);

    let error = DeckSession::open(driver, device_type, serial).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");
    assert!(mock.calls().is_empty(), "native call before validation");
}

#[test]
fn test_open_rejects_invalid_config() {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);
    let config = SessionConfig {
        event_capacity: 0,
        ..SessionConfig::default()
    };

    let result = DeckSession::open_with_config(driver, DeviceType::Mini, MINI_SERIAL, &config);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(mock.calls().is_empty());
}

#[test]
fn test_open_without_geometry_returns_none() {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);
    mock.fail_type_info(true);

    let session = DeckSession::open(driver, DeviceType::Mini, MINI_SERIAL).unwrap();
    assert!(session.is_none());
    assert_eq!(mock.read_count(), 0);
}

#[test]
fn test_open_first_any_type() {
    let (driver, _mock) = mock_with(DeviceType::Xl, "XL0001");

    let session = DeckSession::open_first(driver, DeviceType::None)
        .unwrap()
        .unwrap();
    assert_eq!(session.serial_number(), "XL0001");
    assert_eq!(session.type_info().key_count(), 32);
    session.close();
}

#[test]
fn test_open_first_wrong_type_returns_none() {
    let (driver, _mock) = mock_with(DeviceType::Xl, "XL0001");
    assert!(
        DeckSession::open_first(driver, DeviceType::Mini)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_open_first_unreadable_serial_returns_none() {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);
    mock.fail_serial_number(true);

    assert!(
        DeckSession::open_first(driver, DeviceType::Mini)
            .unwrap()
            .is_none()
    );
    assert!(mock.calls().contains(&MockCall::SerialNumber));
}

#[test]
fn test_open_first_serial_too_long_returns_none() {
    // 32 UTF-16 units do not fit the buffer once the terminator is counted.
    let serial = "S".repeat(32);
    let (driver, _mock) = mock_with(DeviceType::Mini, &serial);

    assert!(
        DeckSession::open_first(driver, DeviceType::Mini)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_open_enumerated_device() {
    let (driver, mock) = mock_with(DeviceType::MiniMk2, MINI_SERIAL);
    let directory = Directory::new(driver);

    let devices = directory.enumerate().unwrap();
    let session = DeckSession::open_device(directory.driver().clone(), &devices[0])
        .unwrap()
        .unwrap();
    assert_eq!(session.type_info().device_type, DeviceType::MiniMk2);

    session.close();
    assert_clean_teardown(&mock);
}

// ============================================================================
// Commands
// ============================================================================

#[rstest]
#[case(0)]
#[case(50)]
#[case(100)]
fn test_brightness_in_range(#[case] percent: u8) {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);

    assert!(session.set_brightness(percent).unwrap());
    assert!(mock.calls().contains(&MockCall::SetBrightness(percent)));
}

#[rstest]
#[case(101)]
#[case(255)]
fn test_brightness_out_of_range(#[case] percent: u8) {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);

    let error = session.set_brightness(percent).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(
        !mock
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::SetBrightness(_)))
    );
}

#[rstest]
#[case::rgba(PixelFormat::Rgba)]
#[case::xrgb(PixelFormat::Xrgb)]
fn test_set_image_24_rejects_32_bit_format(#[case] format: PixelFormat) {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let buffer = vec![0u8; session.type_info().image_buffer_len(format)];

    let error = session.set_image_24(&buffer, format, 90).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(
        !mock
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::SetImage24 { .. }))
    );
}

#[rstest]
#[case::rgb(PixelFormat::Rgb)]
#[case::bgr(PixelFormat::Bgr)]
fn test_set_image_32_rejects_24_bit_format(#[case] format: PixelFormat) {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let buffer = vec![0u8; session.type_info().image_buffer_len(format)];

    let error = session.set_image_32(&buffer, format, 90).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(
        !mock
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::SetImage32 { .. }))
    );
}

#[test]
fn test_image_commands_forward_arguments() {
    let (session, mock) = open_session(DeviceType::Mk2, MK2_SERIAL);
    let info = *session.type_info();
    let panel_24 = vec![0u8; info.image_buffer_len(PixelFormat::Bgr)];
    let panel_32 = vec![0u8; info.image_buffer_len(PixelFormat::Bgra)];
    let key = vec![0u8; info.key_image_buffer_len(PixelFormat::Rgb)];

    assert!(session.set_image(&panel_32, PixelFormat::Bgra, 80).unwrap());
    assert!(session.set_image_24(&panel_24, PixelFormat::Bgr, 70).unwrap());
    assert!(session.set_image_32(&panel_32, PixelFormat::Bgra, 60).unwrap());
    assert!(session.set_key_image(4, 2, &key, PixelFormat::Rgb, 50).unwrap());

    let calls = mock.calls();
    assert!(calls.contains(&MockCall::SetImage32 {
        format: PixelFormat::Bgra,
        quality: 80,
        len: panel_32.len(),
    }));
    assert!(calls.contains(&MockCall::SetImage24 {
        format: PixelFormat::Bgr,
        quality: 70,
        len: panel_24.len(),
    }));
    assert!(calls.contains(&MockCall::SetImage32 {
        format: PixelFormat::Bgra,
        quality: 60,
        len: panel_32.len(),
    }));
    assert!(calls.contains(&MockCall::SetKeyImage {
        x: 4,
        y: 2,
        format: PixelFormat::Rgb,
        quality: 50,
        len: key.len(),
    }));
}

#[rstest]
#[case::rgb(PixelFormat::Rgb, true)]
#[case::bgr(PixelFormat::Bgr, true)]
#[case::bgra(PixelFormat::Bgra, false)]
#[case::xrgb(PixelFormat::Xrgb, false)]
fn test_set_image_dispatches_by_pixel_width(#[case] format: PixelFormat, #[case] is_24_bit: bool) {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let buffer = vec![0u8; session.type_info().image_buffer_len(format)];

    assert!(session.set_image(&buffer, format, 90).unwrap());

    let expected = if is_24_bit {
        MockCall::SetImage24 {
            format,
            quality: 90,
            len: buffer.len(),
        }
    } else {
        MockCall::SetImage32 {
            format,
            quality: 90,
            len: buffer.len(),
        }
    };
    let calls = mock.calls();
    assert!(calls.contains(&expected), "missing {expected:?} in {calls:?}");
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, MockCall::SetImage { .. })),
        "generic image call used: {calls:?}"
    );
}

#[test]
fn test_quality_forwarded_verbatim() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let key = vec![0u8; session.type_info().key_image_buffer_len(PixelFormat::Rgb)];

    session.set_key_image(0, 0, &key, PixelFormat::Rgb, 250).unwrap();
    assert!(mock.calls().iter().any(|call| matches!(
        call,
        MockCall::SetKeyImage { quality: 250, .. }
    )));
}

#[test]
fn test_key_coordinates_not_range_checked() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let key = vec![0u8; session.type_info().key_image_buffer_len(PixelFormat::Rgb)];

    session.set_key_image(-1, 99, &key, PixelFormat::Rgb, 90).unwrap();
    assert!(mock.calls().iter().any(|call| matches!(
        call,
        MockCall::SetKeyImage { x: -1, y: 99, .. }
    )));
}

#[test]
fn test_short_buffers_rejected() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let info = *session.type_info();
    let panel = vec![0u8; info.image_buffer_len(PixelFormat::Rgba) - 1];
    let key = vec![0u8; info.key_image_buffer_len(PixelFormat::Rgb) - 1];

    assert!(
        session
            .set_image(&panel, PixelFormat::Rgba, 90)
            .unwrap_err()
            .is_invalid_argument()
    );
    assert!(
        session
            .set_key_image(0, 0, &key, PixelFormat::Rgb, 90)
            .unwrap_err()
            .is_invalid_argument()
    );
    assert!(
        !mock
            .calls()
            .iter()
            .any(|call| matches!(
                call,
                MockCall::SetImage { .. } | MockCall::SetImage32 { .. } | MockCall::SetKeyImage { .. }
            ))
    );
}

#[test]
fn test_native_failure_is_false_not_error() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    mock.set_command_result(false);

    assert!(!session.set_brightness(40).unwrap());
    assert!(!session.set_screensaver().unwrap());
    assert!(mock.calls().contains(&MockCall::SetScreensaver));
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_close_frees_after_last_read() {
    let (session, mock) = open_session(DeviceType::Mk2, MK2_SERIAL);

    // Let the poller complete a few reads first.
    while mock.read_count() < 3 {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(session.poller_state(), PollerState::Running);

    session.close();
    assert_clean_teardown(&mock);
}

#[test]
fn test_drop_frees_once() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    drop(session);
    assert_clean_teardown(&mock);
}

#[tokio::test]
async fn test_close_async_frees_once() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    session.close_async().await;
    assert_clean_teardown(&mock);
}

#[tokio::test]
async fn test_close_async_cancelled_still_frees() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);

    // Dropping the close future leaves teardown to the session's Drop.
    let close = session.close_async();
    let _ = tokio::time::timeout(Duration::ZERO, close).await;

    assert_clean_teardown(&mock);
}

#[tokio::test]
async fn test_event_channel_closes_after_close() {
    let (session, _mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    let mut events = session.subscribe();

    session.close_async().await;
    assert!(matches!(
        events.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}

#[test]
fn test_reopen_after_close() {
    let (driver, mock) = mock_with(DeviceType::Mini, MINI_SERIAL);

    let first = DeckSession::open(driver.clone(), DeviceType::Mini, MINI_SERIAL)
        .unwrap()
        .unwrap();
    first.close();

    let second = DeckSession::open(driver, DeviceType::Mini, MINI_SERIAL)
        .unwrap()
        .unwrap();
    assert_eq!(mock.open_count(), 1);
    second.close();
    assert_eq!(mock.free_count(), 2);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "native free failed")]
fn test_failed_free_asserts_in_debug() {
    let (session, mock) = open_session(DeviceType::Mini, MINI_SERIAL);
    mock.set_free_result(false);
    session.close();
}
