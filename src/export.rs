use crate::error::Result;
use crate::session::Session;
use crate::transform::{extents, Homography};

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const CORNERS: [&str; 8] = ["fbr", "fbl", "bbr", "bbl", "ftr", "ftl", "btr", "btl"];

fn header(cameras: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = [
        "Frame #",
        "Timestamp",
        "Object ID",
        "Object class",
        "BBox xmin",
        "BBox ymin",
        "BBox xmax",
        "BBox ymax",
        "vel_x",
        "vel_y",
        "Generation method",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for corner in CORNERS {
        columns.push(format!("{}x", corner));
        columns.push(format!("{}y", corner));
    }

    for corner in &CORNERS[..4] {
        columns.push(format!("{}_x", corner));
        columns.push(format!("{}_y", corner));
    }

    columns.extend(
        [
            "direction",
            "camera",
            "acceleration",
            "speed",
            "veh rear x",
            "veh center y",
            "theta",
            "width",
            "length",
            "height",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    columns.push(format!("ts_bias for cameras [{}]", cameras.join(";")));

    columns
}

/// Writes one row per record, frame by frame; returns the number of rows.
///
/// Image columns are the drawn projection, ground columns the stored footprint.
/// Velocity, acceleration and speed are not estimated and written as 0.
pub fn write_csv<H, W>(session: &Session<H>, writer: W) -> Result<usize>
where
    H: Homography + Serialize,
    W: Write,
{
    let mut writer = BufWriter::new(writer);
    let store = session.store();

    writeln!(writer, "{}", header(store.cameras()).join(","))?;

    let bias = format!(
        "[{}]",
        session
            .bias()
            .as_slice()
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(";")
    );

    let mut rows = 0;
    for (frame_idx, frame) in store.frames().enumerate() {
        for record in frame.iter().filter(|r| r.x != 0.0) {
            let poly = session.project(record)?;
            let bbox = extents(&poly);

            let mut row: Vec<String> = vec![
                frame_idx.to_string(),
                record.timestamp.to_string(),
                record.identity.to_string(),
                record.class.clone(),
                bbox.left().to_string(),
                bbox.top().to_string(),
                bbox.right().to_string(),
                bbox.bottom().to_string(),
                "0".to_string(),
                "0".to_string(),
                record.generation.to_string(),
            ];

            row.extend(poly.iter().flat_map(|p| [p.x.to_string(), p.y.to_string()]));
            row.extend(
                record
                    .state_box()
                    .footprint()
                    .iter()
                    .flat_map(|p| [p.x.to_string(), p.y.to_string()]),
            );

            row.extend([
                i8::from(record.direction).to_string(),
                record.camera.clone(),
                "0".to_string(),
                "0".to_string(),
                record.x.to_string(),
                record.y.to_string(),
                record.direction.heading().to_string(),
                record.width.to_string(),
                record.length.to_string(),
                record.height.to_string(),
                bias.clone(),
            ]);

            writeln!(writer, "{}", row.join(","))?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

pub fn export_csv<H, P>(session: &Session<H>, path: P) -> Result<usize>
where
    H: Homography + Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let rows = write_csv(session, File::create(path)?)?;

    info!("Wrote {} rows to {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::record::Direction;
    use crate::store::tests::record;
    use crate::transform::tests::sample_camera;
    use crate::transform::ProjectiveCamera;

    fn session() -> Session<ProjectiveCamera> {
        let mut s = Session::new(["p1c1", "p1c2"], sample_camera(), Config::default());
        s.store_mut().insert(0, record("p1c1", 1, 100.0, 20.0, 3.5));

        let mut wb = record("p1c2", 2, 140.0, 80.0, 3.6);
        wb.direction = Direction::Westbound;
        s.store_mut().insert(2, wb);

        s.store_mut().insert(2, record("p1c1", 3, 0.0, 20.0, 3.6));
        s.nudge_time_bias("p1c2", 100.0).unwrap();
        s
    }

    fn export(s: &Session<ProjectiveCamera>) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        write_csv(s, &mut out).unwrap();

        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| l.split(',').map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_and_rows_have_same_width() {
        let rows = export(&session());

        assert_eq!(rows[0].len(), 46);
        assert_eq!(rows[0][11], "fbrx");
        assert_eq!(rows[0][27], "fbr_x");
        assert_eq!(rows[0][45], "ts_bias for cameras [p1c1;p1c2]");
        assert!(rows[1..].iter().all(|r| r.len() == 46));
    }

    #[test]
    fn rows_follow_frames_and_skip_unplaced() {
        let rows = export(&session());
        assert_eq!(rows.len(), 3);

        let eb = &rows[1];
        assert_eq!(eb[0], "0");
        assert_eq!(eb[1], "3.5");
        assert_eq!(eb[2], "1");
        assert_eq!(eb[10], "Manual");
        assert_eq!(eb[35], "1");
        assert_eq!(eb[36], "p1c1");
        assert_eq!(eb[41], "0");
        assert_eq!(eb[45], "[0;0.01]");

        let wb = &rows[2];
        assert_eq!(wb[0], "2");
        assert_eq!(wb[35], "-1");
        assert_eq!(wb[41], std::f64::consts::FRAC_PI_2.to_string());
        assert_eq!((wb[42].as_str(), wb[43].as_str(), wb[44].as_str()), ("6", "16", "5"));
    }

    #[test]
    fn bbox_columns_bound_image_corners() {
        let rows = export(&session());
        let row: Vec<f64> = rows[1][4..8].iter().map(|v| v.parse().unwrap()).collect();

        for i in 0..8 {
            let x: f64 = rows[1][11 + 2 * i].parse().unwrap();
            let y: f64 = rows[1][12 + 2 * i].parse().unwrap();
            assert!(x >= row[0] && x <= row[2]);
            assert!(y >= row[1] && y <= row[3]);
        }
    }

    #[test]
    fn export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.csv");

        assert_eq!(export_csv(&session(), &path).unwrap(), 2);
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("Frame #,"));
    }
}
