use super::*;
use shared::protocol::ImageKind;
use tokio::sync::broadcast::error::TryRecvError;

fn assert_silent<T: Clone + std::fmt::Debug>(rx: &mut broadcast::Receiver<T>) {
    match rx.try_recv() {
        Err(TryRecvError::Empty) => {}
        other => panic!("expected no emission, got {other:?}"),
    }
}

#[test]
fn image_frame_is_published_on_raw_then_image_channel() {
    let dispatcher = FrameDispatcher::new();
    let mut raw = dispatcher.subscribe_raw();
    let mut images = dispatcher.subscribe_images();
    let mut clouds = dispatcher.subscribe_point_clouds();

    let frame = dispatcher
        .on_message(r#"{"fileType":"jpg","payload":"Zm9v","filename":"a.jpg","session":"trial1"}"#)
        .expect("dispatched");
    assert!(matches!(frame, Frame::Image(_)));

    let envelope = raw.try_recv().expect("raw emission");
    assert_eq!(envelope.file_type.as_deref(), Some("jpg"));
    let image = images.try_recv().expect("image emission");
    assert_eq!(image.kind, ImageKind::Jpg);
    assert_eq!(image.filename, "a.jpg");
    assert_eq!(image.session_folder, "trial1");
    assert_silent(&mut clouds);
}

#[test]
fn incomplete_messages_emit_nothing() {
    let dispatcher = FrameDispatcher::new();
    let mut raw = dispatcher.subscribe_raw();
    let mut images = dispatcher.subscribe_images();
    let mut clouds = dispatcher.subscribe_point_clouds();

    for message in [
        r#"{"payload":"Zm9v"}"#,
        r#"{"fileType":"bmp"}"#,
        r#"{"fileType":"jpg","payload":""}"#,
        "{not json",
    ] {
        let err = dispatcher.on_message(message).expect_err(message);
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }
    assert_silent(&mut raw);
    assert_silent(&mut images);
    assert_silent(&mut clouds);
}

#[test]
fn unknown_file_type_is_dropped_without_emission() {
    let dispatcher = FrameDispatcher::new();
    let mut raw = dispatcher.subscribe_raw();
    let mut images = dispatcher.subscribe_images();

    let frame = dispatcher
        .on_message(r#"{"fileType":"bogus","payload":"x"}"#)
        .expect("parsed");
    assert!(matches!(frame, Frame::Unknown { .. }));
    assert_silent(&mut raw);
    assert_silent(&mut images);

    dispatcher
        .on_message(r#"{"fileType":"bmp","payload":"AAAA"}"#)
        .expect("later message still dispatched");
    assert_eq!(images.try_recv().expect("image").filename, "unknown.bmp");
}

#[test]
fn pointcloud_json_dispatches_one_frame_with_all_points_in_order() {
    let dispatcher = FrameDispatcher::new();
    let mut clouds = dispatcher.subscribe_point_clouds();

    let points: Vec<serde_json::Value> = (0..25)
        .map(|i| serde_json::json!({ "x": i, "y": i * 2, "z": -i }))
        .collect();
    let message = serde_json::json!({
        "fileType": "pointcloud-json",
        "payload": serde_json::to_string(&points).expect("payload"),
        "filename": "scan.json",
        "session": "trial1",
    })
    .to_string();

    dispatcher.on_message(&message).expect("dispatched");
    let cloud = clouds.try_recv().expect("cloud");
    assert_silent(&mut clouds);
    assert_eq!(cloud.filename, "scan.json");
    let PointCloudData::Points(parsed) = cloud.data else {
        panic!("expected structured points");
    };
    assert_eq!(parsed.len(), 25);
    for (i, point) in parsed.iter().enumerate() {
        assert_eq!(point.x, i as f64);
        assert_eq!(point.z, -(i as f64));
    }
}

#[test]
fn malformed_pointcloud_does_not_stop_later_dispatch() {
    let dispatcher = FrameDispatcher::new();
    let mut clouds = dispatcher.subscribe_point_clouds();

    dispatcher
        .on_message(r#"{"fileType":"pointcloud-json","payload":"[{oops"}"#)
        .expect_err("malformed cloud");
    assert_silent(&mut clouds);

    dispatcher
        .on_message(r#"{"fileType":"ply","payload":"ply\nformat ascii 1.0"}"#)
        .expect("ply dispatched");
    let cloud = clouds.try_recv().expect("ply cloud");
    assert_eq!(cloud.filename, "cloud.ply");
    assert!(matches!(cloud.data, PointCloudData::Ply(_)));
}

#[test]
fn dropping_one_subscriber_leaves_others_untouched() {
    let dispatcher = FrameDispatcher::new();
    let first = dispatcher.subscribe_images();
    let mut second = dispatcher.subscribe_images();
    drop(first);

    dispatcher
        .on_message(r#"{"fileType":"jpg","payload":"Zm9v"}"#)
        .expect("dispatched");
    assert_eq!(second.try_recv().expect("image").filename, "unknown.jpg");
}

#[test]
fn dispatch_without_subscribers_still_returns_frame() {
    let dispatcher = FrameDispatcher::default();
    let frame = dispatcher
        .on_message(r#"{"fileType":"jpg","payload":"Zm9v","filename":"b.jpg"}"#)
        .expect("dispatched");
    assert_eq!(frame.file_path().as_deref(), Some("/b.jpg"));
}
