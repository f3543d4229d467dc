//! Writers for real-world trajectories.

use crate::error::Result;
use crate::tracker_real::{ExportOptions, RealPerson, RealPoint};
use nalgebra as na;
use std::io::Write;

/// Meta data handed to [`ExportWriter::begin`].
#[derive(Debug, Clone, Copy)]
pub struct ExportHeader<'a> {
    pub fps: f64,
    /// Project file name, if any.
    pub project: Option<&'a str>,
    pub options: &'a ExportOptions,
    pub persons: &'a [RealPerson],
}

/// Receives one call per person and frame, persons ascending, frames
/// ascending within a person.
pub trait ExportWriter {
    fn begin(&mut self, header: &ExportHeader<'_>) -> Result<()>;

    fn record(&mut self, person: &RealPerson, point: &RealPoint) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// Whitespace delimited text with `#` header lines.
pub struct TxtWriter<W: Write> {
    out: W,
    options: Option<ExportOptions>,
    comments: bool,
}

impl<W: Write> TxtWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            options: None,
            comments: false,
        }
    }

    /// Adds a table with the person comments to the header.
    pub fn with_comments(mut self, yes: bool) -> Self {
        self.comments = yes;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ExportWriter for TxtWriter<W> {
    fn begin(&mut self, header: &ExportHeader<'_>) -> Result<()> {
        if let Some(project) = header.project {
            writeln!(self.out, "# project: {}", project)?;
        }
        writeln!(self.out, "# framerate: {} fps", header.fps)?;

        if self.comments {
            writeln!(self.out, "# personal information:")?;
            writeln!(self.out, "# ID| Comment")?;
            for p in header.persons {
                let mut lines = p.comment.split('\n');
                writeln!(self.out, "#{:>3}|{}", p.nr, lines.next().unwrap_or(""))?;
                for line in lines {
                    writeln!(self.out, "#   |{}", line)?;
                }
            }
        }

        let opt = header.options;
        let mut columns = String::from("# id frame x/cm y/cm z/cm");
        if opt.view_direction {
            columns.push_str(" viewDirX viewDirY");
        }
        if opt.angle_of_view {
            columns.push_str(" angleOfView/deg");
        }
        if opt.marker_id {
            columns.push_str(" markerID");
        }
        writeln!(self.out, "{}", columns)?;

        self.options = Some(*opt);
        Ok(())
    }

    fn record(&mut self, person: &RealPerson, point: &RealPoint) -> Result<()> {
        let opt = self.options.unwrap_or_default();
        let p = &point.pos;

        write!(self.out, "{} {} {:.4} {:.4} {:.4}", person.nr, point.frame, p.x, p.y, p.z)?;

        if opt.view_direction {
            let d = point.view_dir.unwrap_or_else(na::Vector2::zeros);
            write!(self.out, " {:.4} {:.4}", d.x, d.y)?;
        }
        if opt.angle_of_view {
            write!(self.out, " {:.2}", point.angle_of_view.unwrap_or(-1.0))?;
        }
        if opt.marker_id {
            write!(self.out, " {}", point.marker_id.unwrap_or(-1))?;
        }

        writeln!(self.out)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
