//! Plain-text volume header: `key=value` lines describing a layout.
//!
//! ```text
//! # survey 42
//! o1=0
//! o2=0
//! o3=0
//! n1=1000
//! n2=800
//! n3=500
//! d1=1
//! d2=1
//! d3=1
//! p1=64
//! p2=64
//! p3=64
//! prefix=survey42_
//! suffix=.bin
//! dir=node0 /mnt/disk0 "/mnt/disk 1"
//! dir=node1 /mnt/disk2
//! ```
//!
//! Every `dir` line starts with a label naming the host, followed by one or
//! more directories. Tokens are split on spaces outside double quotes.

use crate::error::{Result, VolumeError};
use crate::layout::VolumeLayout;
use crate::ring::DirectoryRing;
use crate::types::Dims3;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const DEFAULT_SUFFIX: &str = ".bin";

/// One `dir=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub label: String,
    pub paths: Vec<String>,
}

impl DirEntry {
    pub fn parse(value: &str) -> Result<Self> {
        let mut tokens = tokenize(value).into_iter();
        let label = tokens.next();
        let paths: Vec<String> = tokens.collect();
        match label {
            Some(label) if !paths.is_empty() => Ok(Self { label, paths }),
            _ => Err(VolumeError::InvalidConfig(format!("malformed dir: {}", value))),
        }
    }

    fn render(&self) -> String {
        let mut line = quote(&self.label);
        for path in &self.paths {
            line.push(' ');
            line.push_str(&quote(path));
        }
        line
    }
}

/// Parsed header contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderConfig {
    pub origin: Dims3,
    pub extent: Dims3,
    pub stride: Dims3,
    pub tile_shape: Dims3,
    pub prefix: String,
    pub suffix: String,
    pub dirs: Vec<DirEntry>,
}

#[derive(Default)]
struct Fields {
    o: [Option<i64>; 3],
    n: [Option<i64>; 3],
    d: [Option<i64>; 3],
    p: [Option<i64>; 3],
    prefix: Option<String>,
    suffix: Option<String>,
    dirs: Vec<DirEntry>,
}

impl HeaderConfig {
    /// Parse header text. Unknown keys are ignored with a warning.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = Fields::default();

        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, content = line, "ignoring header line without '='");
                continue;
            };

            let axis_slot = |key: &str| -> Option<usize> {
                match key.as_bytes() {
                    [_, b'1'] => Some(0),
                    [_, b'2'] => Some(1),
                    [_, b'3'] => Some(2),
                    _ => None,
                }
            };

            match (key.chars().next(), axis_slot(key)) {
                (Some('o'), Some(a)) => fields.o[a] = Some(parse_int(key, value)?),
                (Some('n'), Some(a)) => fields.n[a] = Some(parse_int(key, value)?),
                (Some('d'), Some(a)) => fields.d[a] = Some(parse_int(key, value)?),
                (Some('p'), Some(a)) => fields.p[a] = Some(parse_int(key, value)?),
                _ => match key {
                    "prefix" => fields.prefix = Some(value.to_string()),
                    "suffix" => fields.suffix = Some(value.to_string()),
                    "dir" => fields.dirs.push(DirEntry::parse(value)?),
                    _ => warn!(line = lineno + 1, key, "ignoring unknown header key"),
                },
            }
        }

        let mut origin = [0; 3];
        let mut extent = [0; 3];
        let mut stride = [1; 3];
        let mut tile_shape = [0; 3];
        for a in 0..3 {
            let axis = a + 1;
            let o = fields.o[a]
                .ok_or_else(|| VolumeError::InvalidConfig(format!("o{} missing", axis)))?;
            let n = fields.n[a]
                .ok_or_else(|| VolumeError::InvalidConfig(format!("n{} missing", axis)))?;
            origin[a] = non_negative(&format!("o{}", axis), o)?;
            extent[a] = non_negative(&format!("n{}", axis), n)?;
            if let Some(d) = fields.d[a] {
                stride[a] = non_negative(&format!("d{}", axis), d)?;
            }
            // One tile spans the whole axis unless pK is given
            tile_shape[a] = non_negative(&format!("p{}", axis), fields.p[a].unwrap_or(n))?;
        }

        let config = Self {
            origin,
            extent,
            stride,
            tile_shape,
            prefix: fields.prefix.unwrap_or_default(),
            suffix: fields
                .suffix
                .unwrap_or_else(|| DEFAULT_SUFFIX.to_string()),
            dirs: fields.dirs,
        };
        debug!(directories = config.directories().count(), "parsed header");
        Ok(config)
    }

    /// Read and parse a header file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    /// Header text for this configuration
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, values) in [
            ('o', self.origin),
            ('n', self.extent),
            ('d', self.stride),
            ('p', self.tile_shape),
        ] {
            for (a, v) in values.iter().enumerate() {
                let _ = writeln!(out, "{}{}={}", key, a + 1, v);
            }
        }
        let _ = writeln!(out, "prefix={}", self.prefix);
        let _ = writeln!(out, "suffix={}", self.suffix);
        for dir in &self.dirs {
            let _ = writeln!(out, "dir={}", dir.render());
        }
        out
    }

    /// Write the header text to a file, replacing it
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.render())?;
        Ok(())
    }

    /// All directories of all `dir` lines, in order
    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.dirs
            .iter()
            .flat_map(|d| d.paths.iter().map(String::as_str))
    }

    /// Build and validate the layout this header describes
    pub fn to_layout(&self) -> Result<VolumeLayout> {
        VolumeLayout::build(
            self.origin,
            self.extent,
            self.stride,
            self.tile_shape,
            self.prefix.clone(),
            self.suffix.clone(),
            DirectoryRing::new(self.directories())?,
        )
    }

    /// Describe a layout, with all its directories on one `dir` line
    pub fn from_layout(layout: &VolumeLayout, label: impl Into<String>) -> Self {
        Self {
            origin: layout.origin(),
            extent: layout.extent(),
            stride: layout.stride(),
            tile_shape: layout.tile_shape(),
            prefix: layout.prefix().to_string(),
            suffix: layout.suffix().to_string(),
            dirs: vec![DirEntry {
                label: label.into(),
                paths: layout
                    .directories()
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
            }],
        }
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|e| VolumeError::InvalidConfig(format!("{}={}: {}", key, value, e)))
}

fn non_negative(key: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| VolumeError::InvalidConfig(format!("{} < 0", key)))
}

/// Split on spaces outside double quotes; quotes are dropped
fn tokenize(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn quote(token: &str) -> String {
    if token.contains(' ') {
        format!("\"{}\"", token)
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const HEADER: &str = "\
# test volume
o1=0
o2=10
o3=100
n1=20
n2=30
n3=40
d1=1
d2=2
d3=4
p1=8
p2=8
p3=8
prefix=cube_
suffix=.f32
dir=host0 /data/one \"/data/two words\"
dir=host1 /data/three
";

    #[test]
    fn test_parse_header() {
        let config = HeaderConfig::parse(HEADER).unwrap();
        assert_eq!(config.origin, [0, 10, 100]);
        assert_eq!(config.extent, [20, 30, 40]);
        assert_eq!(config.stride, [1, 2, 4]);
        assert_eq!(config.tile_shape, [8, 8, 8]);
        assert_eq!(config.prefix, "cube_");
        assert_eq!(config.suffix, ".f32");
        assert_eq!(
            config.directories().collect::<Vec<_>>(),
            vec!["/data/one", "/data/two words", "/data/three"]
        );
        assert_eq!(config.dirs[1].label, "host1");
    }

    #[test]
    fn test_render_round_trip() {
        let config = HeaderConfig::parse(HEADER).unwrap();
        let reparsed = HeaderConfig::parse(&config.render()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_tile_shape_defaults_to_extent() {
        let text = "o1=0\no2=0\no3=0\nn1=5\nn2=6\nn3=7\np3=2\nprefix=x\ndir=h /d\n";
        let config = HeaderConfig::parse(text).unwrap();
        assert_eq!(config.tile_shape, [5, 6, 2]);
        assert_eq!(config.stride, [1, 1, 1]);
        assert_eq!(config.suffix, ".bin");
    }

    #[test]
    fn test_header_errors() {
        let missing_origin = "o1=0\no2=0\nn1=1\nn2=1\nn3=1\nprefix=x\ndir=h /d\n";
        assert!(matches!(
            HeaderConfig::parse(missing_origin),
            Err(VolumeError::InvalidConfig(_))
        ));

        let negative = "o1=-1\no2=0\no3=0\nn1=1\nn2=1\nn3=1\nprefix=x\ndir=h /d\n";
        match HeaderConfig::parse(negative) {
            Err(VolumeError::InvalidConfig(msg)) => assert_eq!(msg, "o1 < 0"),
            other => panic!("unexpected {:?}", other),
        }

        assert!(HeaderConfig::parse("n1=abc\n").is_err());
        assert!(DirEntry::parse("lonely").is_err());
    }

    #[test]
    fn test_to_layout() {
        let layout = HeaderConfig::parse(HEADER).unwrap().to_layout().unwrap();
        assert_eq!(layout.tile_grid_shape(), [3, 4, 5]);
        assert_eq!(layout.directories().len(), 3);
        assert_eq!(
            layout.filename_for(crate::types::GridIndex::new(0, 0, 1)),
            PathBuf::from("/data/two words/cube_0_0_8.f32")
        );

        let back = HeaderConfig::from_layout(&layout, "local");
        assert_eq!(back.to_layout().unwrap(), layout);
    }

    #[test]
    fn test_empty_prefix_rejected_by_layout() {
        let text = "o1=0\no2=0\no3=0\nn1=1\nn2=1\nn3=1\ndir=h /d\n";
        let config = HeaderConfig::parse(text).unwrap();
        assert!(matches!(
            config.to_layout(),
            Err(VolumeError::InvalidConfig(_))
        ));
    }
}
