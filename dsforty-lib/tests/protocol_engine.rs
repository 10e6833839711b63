//! Protocol engine behaviour against a scripted device

mod common;

use common::*;
use dsforty_lib::ParameterBlock;
use dsforty_lib::protocol::{ImageReply, scan_page};

fn params() -> ParameterBlock {
    ParameterBlock::build(&ScanConfig::default())
}

#[tokio::test]
async fn test_buffer_is_sum_of_declared_chunks() {
    let chunks = vec![
        (vec![0xFF, 0xD8, 0xFF], None),
        (vec![7; 4096], None),
        (vec![0xFF, 0xD9], Some(3300)),
    ];
    let mut channel = ScriptedChannel::new(page_replies(0, &chunks));

    let raw = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(raw.jpeg.len(), 3 + 4096 + 2);
    assert!(raw.jpeg.starts_with(&[0xFF, 0xD8, 0xFF]));
    assert!(raw.jpeg.ends_with(&[0xFF, 0xD9]));
    assert_eq!(raw.final_height, 3300);
    assert_eq!(channel.remaining_replies(), 0);
}

#[tokio::test]
async fn test_last_height_marker_wins() {
    let chunks = vec![(vec![1; 16], Some(4200)), (vec![2; 16], Some(1234))];
    let mut channel = ScriptedChannel::new(page_replies(0, &chunks));

    let raw = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(raw.final_height, 1234);
}

#[tokio::test]
async fn test_page_without_height_is_rejected_after_drain() {
    let mut channel = ScriptedChannel::new(page_replies(0, &[(vec![1; 16], None)]));

    let err = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::MissingHeight));
    // The device was still returned to idle.
    assert_eq!(channel.writes().last().map(|w| &w[..]), Some(&b"FIN x0000000"[..]));
}

#[tokio::test]
async fn test_foreign_image_ack_is_rejected() {
    let mut replies = handshake_replies();
    replies.push(Reply::data(&b"TRDTx0000000"[..]));
    replies.push(Reply::data(&b"NAK x0000000"[..]));
    let mut channel = ScriptedChannel::new(replies);

    let err = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::BadImageAck { .. }));
}

#[tokio::test]
async fn test_empty_reads_inside_a_chunk_are_skipped() {
    let mut replies = handshake_replies();
    replies.push(Reply::data(&b"TRDTx0000000"[..]));
    replies.push(image_reply(6, Some(99)));
    replies.push(Reply::data(&b"abc"[..]));
    replies.push(Reply::data(Bytes::new()));
    replies.push(Reply::data(&b"def"[..]));
    replies.push(Reply::data(&b"IMG x0000000#errADF PE"[..]));
    replies.push(Reply::data(&b"FIN x0000000"[..]));
    let mut channel = ScriptedChannel::new(replies);

    let raw = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(&raw.jpeg[..], b"abcdef");
}

#[tokio::test]
async fn test_stalled_chunk_is_malformed() {
    let mut replies = handshake_replies();
    replies.push(Reply::data(&b"TRDTx0000000"[..]));
    replies.push(image_reply(4, Some(99)));
    replies.extend((0..40).map(|_| Reply::data(Bytes::new())));
    let mut channel = ScriptedChannel::new(replies);

    let err = scan_page(&mut channel, &params(), fast_engine(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedReply(_)));
}

#[tokio::test]
async fn test_params_frame_is_two_writes() {
    let mut channel = ScriptedChannel::new(page_replies(0, &[(vec![1], Some(1))]));
    let block = params();
    scan_page(&mut channel, &block, fast_engine(), &CancellationToken::new())
        .await
        .unwrap();

    let writes = channel.writes();
    assert_eq!(&writes[2][..], b"PARAx00003A0");
    assert_eq!(&writes[3], block.payload());
}

#[test]
fn test_image_reply_chunk_without_height() {
    assert_eq!(
        ImageReply::parse(b"IMG x0100000").unwrap(),
        ImageReply::Chunk {
            len: 0x100000,
            height: None
        }
    );
}
