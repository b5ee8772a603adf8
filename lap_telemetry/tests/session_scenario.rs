use lap_telemetry::{
    calibrate, cartesian_distance, gps_distance, parse_reference_points, parse_session,
    IndexSpace, OriginPolicy, SampleRateConfig, SectorExtractor, Value, DEFAULT_ALTITUDE_M,
};

const SESSION_RATE: usize = 30;
const TIRE_RATE: usize = 5;
const SECONDS: usize = 60;

/// A 60 s export at 30 Hz. The tire channel is recorded at 5 Hz, so its 300 samples fill the
/// top of its column and the remaining cells are empty.
fn export() -> String {
    let rows = SESSION_RATE * SECONDS;
    let mut text = String::from(
        "Format,PDR\nVenue,Laguna Seca\nSession date,2024-05-12\n\n\
         Driver,Vehicle\n,\nA. Driver,Corvette C7\n\n\
         Time,GPS Latitude,GPS Longitude,Tire Temp Inner FL,Sector Time\n\
         s,deg,deg,C,s\n",
    );
    for row in 0..rows {
        let t = row as f64 / SESSION_RATE as f64;
        let lat = 36.5840 + 0.0001 * (t / 6.0).floor();
        let lon = -121.7540 + 0.0001 * (t / 10.0).floor();
        let tire = if row < TIRE_RATE * SECONDS {
            format!("{}", 60 + row / 25)
        } else {
            String::new()
        };
        let sector = match row {
            r if r < 600 => "0",
            r if r < 1300 => "21.3",
            _ => "23.9",
        };
        text.push_str(&format!("{},{},{},{},{}\n", t, lat, lon, tire, sector));
    }
    text
}

fn rates() -> SampleRateConfig {
    SampleRateConfig::parse("Channels|Default:30\nTire Temp Inner FL|5\n").unwrap()
}

#[test]
fn multi_rate_session_end_to_end() {
    let mut session = parse_session(&export()).unwrap();
    assert_eq!(session.header.get("venue"), Some("Laguna Seca"));
    assert_eq!(
        session.info.get("vehicle").unwrap().value,
        Some(Value::from("Corvette C7"))
    );

    let frame = &mut session.frame;
    assert_eq!(frame.row_count(), 1800);
    frame.assign_sample_rates(&rates()).unwrap();

    let axes = frame.time_axes().unwrap();
    assert_eq!(axes[&30].len(), 1800);
    assert_eq!(axes[&5].len(), 300);
    assert!((axes[&5].time_at(50).unwrap() - 10.0).abs() < 1e-12);

    let tire = frame.field("tire_temp_inner_fl").unwrap();
    // 300 samples changing every 25 -> 12 runs
    assert_eq!(tire.len(), 12);
    assert_eq!(
        tire.lookup(300, IndexSpace::Default).unwrap(),
        tire.lookup(50, IndexSpace::Current).unwrap()
    );
    assert_eq!(tire.lookup(300, IndexSpace::Default).unwrap(), Some(&Value::number(62.0)));

    let dense = tire.numeric_on_axis(frame.axis_for("tire_temp_inner_fl").unwrap()).unwrap();
    assert_eq!(dense.len(), 300);
    assert!(dense.iter().all(Option::is_some));

    let pair = frame.aligned_pair("time", "tire_temp_inner_fl").unwrap();
    assert_eq!(pair.len(), 1800);
    assert_eq!(pair.first.len(), pair.second.len());
}

#[test]
fn sector_events_carry_time_and_position() {
    let mut session = parse_session(&export()).unwrap();
    session.frame.assign_sample_rates(&rates()).unwrap();
    let events = SectorExtractor::new(&session.frame, "sector_time", &["tire_temp_inner_fl"])
        .unwrap()
        .events()
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].reference_position, 600);
    assert!((events[0].time.unwrap() - 20.0).abs() < 1e-9);
    assert_eq!(events[0].companions, vec![Some(Value::number(64.0))]);
    assert_eq!(events[1].marker, Value::number(23.9));
}

#[test]
fn gps_channels_project_onto_calibrated_track() {
    let reference = "x y latitude longitude\n\
                     -410.5 52.25 36.583778°N 121.758089°W\n\
                     -285.0 -104.8 36.582364°N 121.756692°W\n";
    let points = parse_reference_points(reference).unwrap();
    let calibration = calibrate(&points, OriginPolicy::Second, DEFAULT_ALTITUDE_M).unwrap();
    let expected = gps_distance(
        &calibration.candidates[0].coordinates(),
        &calibration.candidates[1].coordinates(),
        DEFAULT_ALTITUDE_M,
    );
    assert_eq!(calibration.discrepancy_m, expected);

    let mut session = parse_session(&export()).unwrap();
    session.frame.assign_sample_rates(&rates()).unwrap();
    let frame = &session.frame;
    let axis = frame.axis_for("gps_latitude").unwrap();
    let lat: Vec<f64> = frame
        .field("gps_latitude")
        .unwrap()
        .numeric_on_axis(axis)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    let lon: Vec<f64> = frame
        .field("gps_longitude")
        .unwrap()
        .numeric_on_axis(axis)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(lat.len(), 1800);

    let track = calibration.frame();
    let xy = track.project_track(&lat, &lon);
    let first = track.project(&lap_telemetry::Coordinates::geodetic(lat[0], lon[0]));
    let last = track.project(&lap_telemetry::Coordinates::geodetic(lat[1799], lon[1799]));
    assert!((xy[1799].0 - last.x).abs() < 1e-9);
    assert!((cartesian_distance(&first, &last) - track.gps_distance(&first, &last)).abs() < 1.0);
}
