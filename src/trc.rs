//! Versioned text format for pixel trajectories.
//!
//! ```text
//! version 5
//! <persons>
//! <nr> <height> <first> <last> <col_count> <r> <g> <b> ["comment"] [marker_id] <points>
//! <frame> <x> <y> [<wx> <wy> <wz>] <quality> [source] <cx> <cy> <r> <g> <b> [marker_id] [marker_size]
//! ```
//!
//! Version 1 files start with the person count. Version 2 adds the world
//! point, version 3 the person comment, version 4 marker ids and the point
//! source and version 5 the recognized marker size. Absent values are written as `-1` (integers) or `NaN`.

use crate::error::{Error, Result};
use crate::image::Rgb;
use crate::person_storage::PersonStorage;
use crate::track_person::TrackPerson;
use crate::track_point::{PointSource, TrackPoint, MAX_QUALITY};
use nalgebra as na;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const TRC_VERSION: u32 = 5;

#[derive(Debug, Clone)]
pub struct TrcFile {
    pub version: u32,
    pub persons: Vec<TrackPerson>,
}

fn escape_comment(s: &str) -> String {
    s.replace('"', "&quot;").replace('\n', "<br>")
}

fn unescape_comment(s: &str) -> String {
    s.replace("<br>", "\n").replace("&quot;", "\"")
}

fn source_code(s: PointSource) -> char {
    match s {
        PointSource::Tracked => 't',
        PointSource::Recognized => 'r',
        PointSource::Manual => 'm',
    }
}

fn write_person<W: Write>(out: &mut W, p: &TrackPerson) -> Result<()> {
    let (r, g, b) = p
        .color
        .map_or((-1, -1, -1), |c| (c.r as i32, c.g as i32, c.b as i32));

    writeln!(
        out,
        "{} {} {} {} {} {} {} {} \"{}\" {} {}",
        p.nr(),
        p.height.unwrap_or(-1.0),
        p.first_frame(),
        p.last_frame(),
        p.col_count,
        r,
        g,
        b,
        escape_comment(&p.comment),
        p.marker_id.unwrap_or(-1),
        p.len()
    )?;

    for (frame, tp) in p.iter() {
        let w = tp.world.unwrap_or_else(|| na::Point3::new(f64::NAN, f64::NAN, f64::NAN));
        let c = tp.col_point.unwrap_or_else(|| na::Point2::new(f64::NAN, f64::NAN));
        let (r, g, b) = tp
            .color
            .map_or((-1, -1, -1), |c| (c.r as i32, c.g as i32, c.b as i32));

        writeln!(
            out,
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            frame,
            tp.pos.x,
            tp.pos.y,
            w.x,
            w.y,
            w.z,
            tp.quality,
            source_code(tp.source),
            c.x,
            c.y,
            r,
            g,
            b,
            tp.marker_id.unwrap_or(-1),
            tp.marker_size.unwrap_or(f64::NAN)
        )?;
    }

    Ok(())
}

/// Writes `persons` in the current format version.
pub fn write_trc<W: Write>(mut out: W, persons: &[TrackPerson]) -> Result<()> {
    writeln!(out, "version {}", TRC_VERSION)?;
    writeln!(out, "{}", persons.len())?;

    for p in persons {
        write_person(&mut out, p)?;
    }

    out.flush()?;
    Ok(())
}

/// Writes the storage to `path` through a temporary sibling file so an
/// interrupted save never leaves a truncated file behind.
pub fn save_trc<P: AsRef<Path>>(path: P, storage: &PersonStorage) -> Result<()> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    write_trc(BufWriter::new(File::create(&tmp)?), storage.persons())?;
    fs::rename(&tmp, path)?;

    info!(
        "export tracking data to {} ({} person(s), file version {})",
        path.display(),
        storage.nb_persons(),
        TRC_VERSION
    );

    Ok(())
}

/// Splits on whitespace, keeping `"quoted text"` as one token.
fn tokenize(line: &str, nr: usize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut rest = line.trim_start();

    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| Error::parse(nr, "unterminated comment"))?;
            tokens.push(quoted[..end].to_string());
            rest = &quoted[end + 1..];
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            tokens.push(rest[..end].to_string());
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }

    Ok(tokens)
}

struct Fields<'a> {
    tokens: std::slice::Iter<'a, String>,
    line: usize,
}

impl<'a> Fields<'a> {
    fn new(tokens: &'a [String], line: usize) -> Self {
        Self {
            tokens: tokens.iter(),
            line,
        }
    }

    fn next_str(&mut self, what: &str) -> Result<&'a str> {
        self.tokens
            .next()
            .map(String::as_str)
            .ok_or_else(|| Error::parse(self.line, format!("missing {}", what)))
    }

    fn next<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let s = self.next_str(what)?;
        s.parse()
            .map_err(|_| Error::parse(self.line, format!("invalid {} `{}`", what, s)))
    }

    fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            Some(t) => Err(Error::parse(self.line, format!("unexpected field `{}`", t))),
            None => Ok(()),
        }
    }
}

fn rgb(r: i32, g: i32, b: i32, line: usize) -> Result<Option<Rgb>> {
    if r < 0 || g < 0 || b < 0 {
        return Ok(None);
    }

    let c = |v: i32| u8::try_from(v).map_err(|_| Error::parse(line, format!("colour value {} out of range", v)));
    Ok(Some(Rgb::new(c(r)?, c(g)?, c(b)?)))
}

fn finite2(x: f64, y: f64) -> Option<na::Point2<f64>> {
    (x.is_finite() && y.is_finite()).then(|| na::Point2::new(x, y))
}

struct Lines<R> {
    inner: std::io::Lines<R>,
    nr: usize,
}

impl<R: BufRead> Lines<R> {
    /// Next non-empty line with its 1-based number.
    fn next_line(&mut self, what: &str) -> Result<(usize, String)> {
        loop {
            self.nr += 1;
            match self.inner.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        return Ok((self.nr, line));
                    }
                }
                None => return Err(Error::parse(self.nr, format!("unexpected end of file, expected {}", what))),
            }
        }
    }
}

fn read_point(line: &str, nr: usize, version: u32) -> Result<(usize, TrackPoint)> {
    let tokens = tokenize(line, nr)?;
    let mut f = Fields::new(&tokens, nr);

    let frame: usize = f.next("frame")?;
    let pos = na::Point2::new(f.next::<f64>("x")?, f.next::<f64>("y")?);
    if !pos.x.is_finite() || !pos.y.is_finite() {
        return Err(Error::parse(nr, "point position is not finite"));
    }

    let world = if version >= 2 {
        let w = na::Point3::new(f.next::<f64>("world x")?, f.next::<f64>("world y")?, f.next::<f64>("world z")?);
        (w.x.is_finite() && w.y.is_finite() && w.z.is_finite()).then_some(w)
    } else {
        None
    };

    let quality: i32 = f.next("quality")?;
    let source = if version >= 4 {
        match f.next_str("source")? {
            "t" => PointSource::Tracked,
            "r" => PointSource::Recognized,
            "m" => PointSource::Manual,
            s => return Err(Error::parse(nr, format!("invalid point source `{}`", s))),
        }
    } else if quality > MAX_QUALITY {
        PointSource::Manual
    } else {
        PointSource::Recognized
    };

    let col_point = finite2(f.next("colour point x")?, f.next("colour point y")?);
    let color = rgb(f.next("red")?, f.next("green")?, f.next("blue")?, nr)?;
    let marker_id = if version >= 4 {
        Some(f.next::<i32>("marker id")?).filter(|id| *id >= 0)
    } else {
        None
    };
    let marker_size = if version >= 5 {
        Some(f.next::<f64>("marker size")?).filter(|s| s.is_finite())
    } else {
        None
    };
    f.finish()?;

    let mut tp = TrackPoint::new(pos, quality, source);
    tp.world = world;
    tp.col_point = col_point;
    tp.color = color;
    tp.marker_id = marker_id;
    tp.marker_size = marker_size;

    Ok((frame, tp))
}

fn read_person<R: BufRead>(lines: &mut Lines<R>, version: u32) -> Result<TrackPerson> {
    let (nr, header) = lines.next_line("person header")?;
    let tokens = tokenize(&header, nr)?;
    let mut f = Fields::new(&tokens, nr);

    let person_nr: i32 = f.next("person number")?;
    let height: f64 = f.next("height")?;
    let first: usize = f.next("first frame")?;
    let last: usize = f.next("last frame")?;
    let col_count: i32 = f.next("colour count")?;
    let color = rgb(f.next("red")?, f.next("green")?, f.next("blue")?, nr)?;
    let comment = if version >= 3 {
        unescape_comment(f.next_str("comment")?)
    } else {
        String::new()
    };
    let marker_id = if version >= 4 {
        Some(f.next::<i32>("marker id")?).filter(|id| *id >= 0)
    } else {
        None
    };
    let count: usize = f.next("point count")?;
    f.finish()?;

    if count == 0 || last < first || count > last - first + 1 {
        return Err(Error::parse(
            nr,
            format!("{} points do not fit frames {}..={}", count, first, last),
        ));
    }

    let mut points = BTreeMap::new();
    for _ in 0..count {
        let (pnr, line) = lines.next_line("track point")?;
        let (frame, tp) = read_point(&line, pnr, version)?;

        if frame < first || frame > last {
            return Err(Error::parse(
                pnr,
                format!("frame {} outside of {}..={}", frame, first, last),
            ));
        }
        if points.keys().next_back().map_or(false, |prev| *prev >= frame) {
            return Err(Error::parse(pnr, format!("frame {} out of order", frame)));
        }
        points.insert(frame, tp);
    }

    let mut person = TrackPerson::from_points(person_nr, points);
    if person.first_frame() != first || person.last_frame() != last {
        return Err(Error::parse(
            nr,
            format!(
                "points span {}..={}, header says {}..={}",
                person.first_frame(),
                person.last_frame(),
                first,
                last
            ),
        ));
    }

    person.height = (height > 0.0).then_some(height);
    person.comment = comment;
    person.color = color;
    person.col_count = col_count.max(0);
    person.marker_id = marker_id;

    Ok(person)
}

/// Parses a whole file. Nothing is returned unless every record is valid.
pub fn read_trc<R: BufRead>(input: R) -> Result<TrcFile> {
    let mut lines = Lines {
        inner: input.lines(),
        nr: 0,
    };

    let (_, first) = lines.next_line("header")?;
    let first = first.trim();

    let (version, count) = match first.parse::<usize>() {
        Ok(count) => (1, count),
        Err(_) => {
            let lower = first.to_ascii_lowercase();
            let version = (2..=TRC_VERSION)
                .rev()
                .find(|v| lower == format!("version {}", v))
                .ok_or_else(|| Error::UnsupportedVersion(first.to_string()))?;

            let (nr, line) = lines.next_line("person count")?;
            let count = line
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::parse(nr, format!("invalid person count `{}`", line.trim())))?;
            (version, count)
        }
    };

    let persons = (0..count)
        .map(|_| read_person(&mut lines, version))
        .collect::<Result<Vec<_>>>()?;

    Ok(TrcFile { version, persons })
}

/// Appends the trajectories of `path` to `storage`. On any error the
/// storage is left untouched. Overlaps with existing trajectories are
/// logged, not merged.
pub fn import_trc<P: AsRef<Path>>(path: P, storage: &mut PersonStorage) -> Result<usize> {
    let path = path.as_ref();
    let file = read_trc(BufReader::new(File::open(path)?))?;

    let before = storage.nb_persons();
    let n = file.persons.len();
    for p in file.persons {
        storage.add_person(p);
    }

    if before > 0 {
        for o in storage.overlaps().iter().filter(|o| o.second >= before && o.first < before) {
            warn!(
                "imported person {} overlaps person {} in frame {} ({:.1} px)",
                o.second + 1,
                o.first + 1,
                o.frame,
                o.distance
            );
        }
    }

    info!("import {} ({} person(s), file version {})", path.display(), n, file.version);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4: &str = "version 4
2
1 180.5 10 12 2 10 20 30 \"tall\" 7 3
10 100 200 NaN NaN NaN 90 r NaN NaN 10 20 30 7
11 101 201 NaN NaN NaN 60 t NaN NaN -1 -1 -1 -1
12 102 202 1 2 150 100 m 98 200 -1 -1 -1 -1
2 -1 20 22 0 -1 -1 -1 \"\" -1 2
20 300 300 NaN NaN NaN 80 r NaN NaN -1 -1 -1 -1
22 304 300 NaN NaN NaN 80 r NaN NaN -1 -1 -1 -1
";

    #[test]
    fn reads_v4() {
        let file = read_trc(V4.as_bytes()).unwrap();
        assert_eq!(file.version, 4);
        assert_eq!(file.persons.len(), 2);

        let p = &file.persons[0];
        assert_eq!(p.height, Some(180.5));
        assert_eq!(p.comment, "tall");
        assert_eq!(p.marker_id, Some(7));
        assert_eq!(p.color, Some(Rgb::new(10, 20, 30)));
        assert_eq!(p.col_count, 2);
        assert_eq!(p.at(11).unwrap().source, PointSource::Tracked);
        assert_eq!(p.at(12).unwrap().world, Some(na::Point3::new(1.0, 2.0, 150.0)));
        assert_eq!(p.at(12).unwrap().col_point, Some(na::Point2::new(98.0, 200.0)));

        let q = &file.persons[1];
        assert_eq!(q.height, None);
        assert_eq!(q.len(), 2);
        assert!(!q.has(21));
    }

    #[test]
    fn marker_size_needs_v5() {
        let line = "10 100 200 NaN NaN NaN 90 r NaN NaN 10 20 30 7 12.5";
        let (_, tp) = read_point(line, 4, 5).unwrap();
        assert_eq!(tp.marker_size, Some(12.5));

        let (_, tp) = read_point(&line.replace(" 12.5", " NaN"), 4, 5).unwrap();
        assert_eq!(tp.marker_size, None);

        // a v4 line carries no size, a v5 line must
        assert!(read_point(line, 4, 4).is_err());
        assert!(read_point(&line.replace(" 12.5", ""), 4, 5).is_err());
    }

    #[test]
    fn reads_v1() {
        let text = "1\n1 170 0 1 0 -1 -1 -1 2\n0 5 6 80 NaN NaN -1 -1 -1\n1 6 6 110 NaN NaN -1 -1 -1\n";
        let file = read_trc(text.as_bytes()).unwrap();

        assert_eq!(file.version, 1);
        let p = &file.persons[0];
        assert_eq!(p.at(0).unwrap().source, PointSource::Recognized);
        assert_eq!(p.at(1).unwrap().source, PointSource::Manual);
        assert_eq!(p.at(1).unwrap().quality, MAX_QUALITY);
    }

    #[test]
    fn comment_round_trip() {
        let mut p = TrackPerson::new(1, 3, TrackPoint::manual(na::Point2::new(1.0, 2.0)));
        p.comment = "line \"one\"\nline two".to_string();

        let mut buf = Vec::new();
        write_trc(&mut buf, &[p.clone()]).unwrap();
        let back = read_trc(buf.as_slice()).unwrap();

        assert_eq!(back.persons[0].comment, p.comment);
        assert_eq!(back.persons[0].at(3), p.at(3));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = read_trc("version 7\n0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(_)));
    }

    #[test]
    fn reports_bad_lines() {
        let truncated = V4.lines().take(4).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            read_trc(truncated.as_bytes()),
            Err(Error::Parse { line: 5, .. })
        ));

        let bad_frame = V4.replace("11 101 201", "13 101 201");
        assert!(matches!(
            read_trc(bad_frame.as_bytes()),
            Err(Error::Parse { line: 5, .. })
        ));

        let bad_number = V4.replace("100 200", "100 abc");
        assert!(matches!(
            read_trc(bad_number.as_bytes()),
            Err(Error::Parse { line: 4, .. })
        ));
    }
}
