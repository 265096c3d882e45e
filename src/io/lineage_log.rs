// -----------------------------------------------------------------------------
// Lineage log (csv): writer, resume reader, initial cell file
// -----------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{CellModel, Frame};
use crate::error::{ConfigError, GeometryError, RunError};

pub const LINEAGE_FILE: &str = "lineage.csv";

const HEADER: [&str; 9] = ["file", "name", "x", "y", "width", "length", "rotation", "split_alpha", "opacity"];

/// One cell of one committed frame, in unpadded image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineageRow {
    pub file: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub length: f64,
    pub rotation: f64,
    pub split_alpha: Option<f64>,
    pub opacity: f64,
}

impl LineageRow {
    fn from_cell(file: &str, cell: &CellModel, padding: usize) -> Self {
        let pad = padding as f64;
        Self {
            file: file.to_string(),
            name: cell.name.clone(),
            x: cell.x - pad,
            y: cell.y - pad,
            width: cell.width,
            length: cell.length,
            rotation: cell.rotation,
            split_alpha: cell.split_alpha,
            opacity: cell.opacity,
        }
    }

    fn into_cell(self) -> Result<CellModel, GeometryError> {
        let mut cell = CellModel::new(self.name, self.x, self.y, self.width, self.length, self.rotation)?
            .with_opacity(self.opacity)?;
        cell.split_alpha = self.split_alpha;
        Ok(cell)
    }
}

/// Append-only log, flushed after every frame.
pub struct LineageLog<W: Write> {
    writer: csv::Writer<W>,
}

impl LineageLog<File> {
    pub fn create(path: &Path) -> Result<Self, RunError> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> LineageLog<W> {
    pub fn new(inner: W) -> Result<Self, RunError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Write every cell of `frame`; coordinates are shifted back by `padding`.
    pub fn append(&mut self, frame: &Frame, padding: usize) -> Result<(), RunError> {
        for cell in frame.cells() {
            self.writer.serialize(LineageRow::from_cell(&frame.file_name, cell, padding))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, RunError> {
        self.writer.into_inner().map_err(|e| RunError::Io(e.into_error()))
    }
}

/// Rebuild committed frames from a previous log, one entry per `file_names`
/// element and in that order.
pub fn read_committed<R: Read>(reader: R, file_names: &[String]) -> Result<Vec<(String, Vec<CellModel>)>, RunError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut by_file: HashMap<String, Vec<CellModel>> = HashMap::new();
    for row in rdr.deserialize() {
        let row: LineageRow = row?;
        let file = row.file.clone();
        let cell = row.into_cell().map_err(|e| RunError::Resume(format!("{}: {}", file, e)))?;
        by_file.entry(file).or_default().push(cell);
    }

    file_names
        .iter()
        .map(|name| {
            by_file
                .remove(name)
                .map(|cells| (name.clone(), cells))
                .ok_or_else(|| RunError::Resume(format!("lineage file has no rows for {}", name)))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct InitialRow {
    name: String,
    x: f64,
    y: f64,
    width: f64,
    length: f64,
    rotation: f64,
    #[serde(default)]
    opacity: Option<f64>,
}

/// Parse the seed cells: `name,x,y,width,length,rotation[,opacity]`.
pub fn read_initial_cells<R: Read>(reader: R) -> Result<Vec<CellModel>, RunError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut cells = Vec::new();
    for row in rdr.deserialize() {
        let row: InitialRow = row?;
        let cell = CellModel::new(row.name, row.x, row.y, row.width, row.length, row.rotation)
            .and_then(|c| c.with_opacity(row.opacity.unwrap_or(1.0)))
            .map_err(|e| ConfigError::Invalid(format!("initial cells: {}", e)))?;
        cells.push(cell);
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::engine::Lineage;

    fn lineage(pad: f64) -> Lineage {
        let a = CellModel::new("1", 20.0 + pad, 30.0 + pad, 8.0, 25.0, 0.5).unwrap();
        let (b0, b1) = CellModel::new("2", 60.0 + pad, 30.0 + pad, 8.0, 40.0, 0.0).unwrap().split(0.5).unwrap();
        Lineage::seed(4, "img004.png", SimulationConfig::default(), vec![a, b0, b1]).unwrap()
    }

    #[test]
    fn writes_header_and_unpadded_rows() {
        let lin = lineage(3.0);
        let mut log = LineageLog::new(Vec::new()).unwrap();
        log.append(lin.frame(0).unwrap(), 3).unwrap();
        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("file,name,x,y,width,length,rotation,split_alpha,opacity"));
        assert_eq!(lines.next(), Some("img004.png,1,20.0,30.0,8.0,25.0,0.5,,1.0"));
        assert_eq!(lines.next().map(|l| l.starts_with("img004.png,20,")), Some(true));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn empty_log_still_has_header() {
        let log = LineageLog::new(Vec::new()).unwrap();
        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        assert_eq!(text, "file,name,x,y,width,length,rotation,split_alpha,opacity\n");
    }

    #[test]
    fn committed_frames_read_back_by_file_name() {
        let lin = lineage(0.0);
        let mut second = lin.frame(0).unwrap().clone();
        second.file_name = "img005.png".into();
        let mut log = LineageLog::new(Vec::new()).unwrap();
        log.append(lin.frame(0).unwrap(), 0).unwrap();
        log.append(&second, 0).unwrap();
        let bytes = log.into_inner().unwrap();

        let names = vec!["img004.png".to_string(), "img005.png".to_string()];
        let frames = read_committed(bytes.as_slice(), &names).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].0, "img005.png");
        let cells: Vec<CellModel> = lin.frame(0).unwrap().cells().cloned().collect();
        assert_eq!(frames[0].1, cells);
        assert_eq!(frames[0].1[1].split_alpha, Some(0.5));
    }

    #[test]
    fn resume_requires_every_requested_frame() {
        let lin = lineage(0.0);
        let mut log = LineageLog::new(Vec::new()).unwrap();
        log.append(lin.frame(0).unwrap(), 0).unwrap();
        let bytes = log.into_inner().unwrap();
        let names = vec!["img004.png".to_string(), "img005.png".to_string()];
        let err = read_committed(bytes.as_slice(), &names).unwrap_err();
        assert!(matches!(err, RunError::Resume(_)));
    }

    #[test]
    fn initial_cells_with_optional_opacity() {
        let text = "name,x,y,width,length,rotation\n1, 50, 50, 10, 30, 0\n2,10,12,6,18,1.5\n";
        let cells = read_initial_cells(text.as_bytes()).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].name, "1");
        assert_eq!(cells[0].opacity, 1.0);

        let text = "name,x,y,width,length,rotation,opacity\n7,5,5,4,9,0,0.25\n";
        let cells = read_initial_cells(text.as_bytes()).unwrap();
        assert_eq!(cells[0].opacity, 0.25);
    }

    #[test]
    fn initial_cells_reject_bad_geometry() {
        let text = "name,x,y,width,length,rotation\n1,50,50,-3,30,0\n";
        assert!(read_initial_cells(text.as_bytes()).is_err());
    }
}
