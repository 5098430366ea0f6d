use bytes::BytesMut;
use tokio_util::codec::Decoder;

use node_warden::node::codec::{ConsoleCodec, MAX_LINE_BYTES};
use node_warden::AppError;

#[test]
fn decodes_complete_lines() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("first\r\nsecond\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("first".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("second".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("SYNCHRON");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"IZED OK\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("SYNCHRONIZED OK".to_owned())
    );
}

#[test]
fn trailing_line_is_flushed_at_eof() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("last words");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap(),
        Some("last words".to_owned())
    );
}

#[test]
fn over_long_line_is_skipped() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 10]);
    buf.extend_from_slice(b"\nShow this help\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("Show this help".to_owned())
    );
}

#[test]
fn over_long_fragment_without_newline_is_discarded() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 10]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"tail of the flood\nnext\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("next".to_owned()));
}

#[test]
fn invalid_utf8_is_io_error() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n'][..]);
    let err = codec.decode(&mut buf).expect_err("invalid utf-8");
    assert!(matches!(err, AppError::Io(_)));
}
