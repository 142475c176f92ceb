use super::*;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn yields_one_sample_per_valid_line() {
    let input: &[u8] =
        b"{\"EKG\":70,\"Pressure\":120}\r\n\r\nnoise\n{\"EKG\":71}\n{\"EKG\":72.5,\"Pressure\":119}\n";
    let before = Utc::now();
    let samples: Vec<SensorSample> = SensorSource::new(input, "test")
        .into_stream()
        .collect()
        .await;

    assert_eq!(samples.len(), 2);
    assert_eq!((samples[0].ekg, samples[0].pressure), (70.0, 120.0));
    assert_eq!((samples[1].ekg, samples[1].pressure), (72.5, 119.0));
    assert!(samples.iter().all(|s| s.timestamp >= before));
    assert!(samples[0].timestamp <= samples[1].timestamp);
}

#[tokio::test]
async fn samples_arrive_lazily_as_lines_are_written() {
    let (mut writer, reader) = tokio::io::duplex(256);
    let mut stream = SensorSource::new(reader, "duplex").into_stream();

    writer
        .write_all(b"{\"EKG\":1,\"Pressure\":2}\n")
        .await
        .expect("write");
    let first = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .expect("timely sample")
        .expect("sample");
    assert_eq!(first.ekg, 1.0);

    writer
        .write_all(b"garbage\n{\"EKG\":3,\"Pressure\":4}\n")
        .await
        .expect("write");
    drop(writer);
    let rest: Vec<SensorSample> = stream.collect().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].pressure, 4.0);
}

#[tokio::test]
async fn invalid_utf8_line_is_dropped_without_ending_the_stream() {
    let mut input = b"{\"EKG\":1,\"Pressure\":2}\n".to_vec();
    input.extend_from_slice(&[0xff, 0xfe, b'\n']);
    input.extend_from_slice(b"{\"EKG\":3,\"Pressure\":4}\n{\"EKG\":5,\"Pressure\":6}");

    let samples: Vec<SensorSample> = SensorSource::new(std::io::Cursor::new(input), "serial")
        .into_stream()
        .collect()
        .await;

    let values: Vec<(f64, f64)> = samples.iter().map(|s| (s.ekg, s.pressure)).collect();
    assert_eq!(values, vec![(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]);
}
