use super::{Provenance, ReconstructedVolume};
use crate::atlas::{AtlasGeometry, Orientation, Resolution};
use crate::consts::VOLUME_ARRAY_NAME;
use crate::Idx3d;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array3, Ix3, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 导出哪一张网格.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExportKind {
    /// 插值补齐后的网格.
    Filled,

    /// 只含源数据的原始网格.
    Raw,
}

/// npz 导出与读取错误.
#[derive(Debug)]
pub enum ExportError {
    /// 底层 I/O 错误.
    IoError(io::Error),

    /// 写 npz 错误.
    WriteNpzError(WriteNpzError),

    /// 读 npz 错误.
    ReadNpzError(ReadNpzError),

    /// 文件中没有名为 `array` 的数组.
    MissingArray,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::WriteNpzError(e) => write!(f, "failed to write npz: {e}"),
            Self::ReadNpzError(e) => write!(f, "failed to read npz: {e}"),
            Self::MissingArray => write!(f, "npz file has no `{VOLUME_ARRAY_NAME}` array"),
        }
    }
}

impl std::error::Error for ExportError {}

impl ReconstructedVolume {
    /// 以压缩 npz 导出, 文件中只有一个名为 `array` 的三维数组, 轴序 `(AP, DV, LR)`.
    ///
    /// 索引到物理坐标的换算见 [`ReconstructedVolume::physical_coordinate`].
    pub fn export_npz<P: AsRef<Path>>(&self, path: P, kind: ExportKind) -> Result<(), ExportError> {
        let file = File::create(path.as_ref()).map_err(ExportError::IoError)?;
        let mut npz = NpzWriter::new_compressed(file);
        let added = match kind {
            ExportKind::Filled => npz.add_array(VOLUME_ARRAY_NAME, &self.intensity),
            ExportKind::Raw => npz.add_array(VOLUME_ARRAY_NAME, &self.raw_intensity()),
        };
        added.map_err(ExportError::WriteNpzError)?;
        npz.finish().map_err(ExportError::WriteNpzError)?;
        log::info!(
            "Exported {:?} volume {:?} to `{}`",
            kind,
            self.shape(),
            path.as_ref().display()
        );
        Ok(())
    }
}

/// 读取 [`ReconstructedVolume::export_npz`] 写出的数组.
pub fn read_npz<P: AsRef<Path>>(path: P) -> Result<Array3<f32>, ExportError> {
    let file = File::open(path).map_err(ExportError::IoError)?;
    let mut npz = NpzReader::new(file).map_err(ExportError::ReadNpzError)?;
    let names = npz.names().map_err(ExportError::ReadNpzError)?;
    let name = names
        .into_iter()
        .find(|n| n.trim_end_matches(".npy") == VOLUME_ARRAY_NAME)
        .ok_or(ExportError::MissingArray)?;
    npz.by_name::<OwnedRepr<f32>, Ix3>(&name)
        .map_err(ExportError::ReadNpzError)
}

/// 压缩存储的 [`ReconstructedVolume`]; 不透明类型.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompactVolume {
    resolution: Resolution,
    orientation: Orientation,

    /// 形状.
    sh: Idx3d,

    /// 小端 `f32` 强度的压缩字节流.
    intensity: Vec<u8>,

    /// 来源编码的压缩字节流.
    provenance: Vec<u8>,
}

fn deflate<I: IntoIterator<Item = u8>>(bytes: I) -> io::Result<Vec<u8>> {
    let mut e = ZlibEncoder::new(Vec::with_capacity(8), Compression::best());
    let buf: Vec<u8> = bytes.into_iter().collect();
    e.write_all(&buf)?;
    e.finish()
}

fn inflate(buf: &[u8], len: usize) -> io::Result<Vec<u8>> {
    // 多读一个字节, 以便发现比预期更长的数据.
    let mut d = ZlibDecoder::new(buf).take((len as u64).saturating_add(1));
    let mut out = Vec::new();
    d.read_to_end(&mut out)?;
    if out.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {len} bytes, found {}", out.len()),
        ));
    }
    Ok(out)
}

impl ReconstructedVolume {
    /// 压缩数据.
    pub fn compact(&self) -> io::Result<CompactVolume> {
        Ok(CompactVolume {
            resolution: self.resolution,
            orientation: self.orientation,
            sh: self.shape(),
            intensity: deflate(self.intensity.iter().flat_map(|v| v.to_le_bytes()))?,
            provenance: deflate(self.provenance.iter().map(Provenance::code))?,
        })
    }
}

impl CompactVolume {
    /// 形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.sh
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.intensity.len() + self.provenance.len()
    }

    /// 解压缩数据. 字节流损坏时返回 `io::ErrorKind::InvalidData`.
    pub fn expand(&self) -> io::Result<ReconstructedVolume> {
        let (a, b, c) = self.sh;
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);
        let (len, bytes) = a
            .checked_mul(b)
            .and_then(|x| x.checked_mul(c))
            .and_then(|l| Some((l, l.checked_mul(4)?)))
            .ok_or_else(|| invalid(format!("shape {:?} is too large", self.sh)))?;

        let raw = inflate(&self.intensity, bytes)?;
        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let codes = inflate(&self.provenance, len)?;
        let tags = codes
            .into_iter()
            .map(|c| Provenance::from_code(c).ok_or_else(|| invalid(format!("bad provenance code {c}"))))
            .collect::<io::Result<Vec<_>>>()?;

        let intensity =
            Array3::from_shape_vec(self.sh, values).map_err(|e| invalid(e.to_string()))?;
        let provenance =
            Array3::from_shape_vec(self.sh, tags).map_err(|e| invalid(e.to_string()))?;
        ReconstructedVolume::new(self.resolution, self.orientation, intensity, provenance)
            .map_err(|e| invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Alignment;
    use crate::atlas::AtlasFrame;
    use crate::transform::{AffineTransform2D, PlanePose};
    use crate::volume::{build, AlignedSlice, VolumeBuildSpec};
    use ndarray::Array2;

    fn sample() -> ReconstructedVolume {
        let f = AtlasFrame::fake(Resolution::Um25, (6, 3, 4));
        let pose = PlanePose::new(-25.0, 0.0, 0.0, &f, Orientation::Coronal).unwrap();
        let s = AlignedSlice::new(
            "a",
            Alignment::new(pose, AffineTransform2D::identity()),
            Ok(Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32 + 0.5)),
        );
        build(&VolumeBuildSpec::new("/"), &f, Orientation::Coronal, vec![s]).0
    }

    #[test]
    fn test_npz_filled_and_raw() {
        let v = sample();
        let dir = tempfile::tempdir().unwrap();

        let p = dir.path().join("filled.npz");
        v.export_npz(&p, ExportKind::Filled).unwrap();
        assert_eq!(read_npz(&p).unwrap(), v.intensity());

        let p = dir.path().join("raw.npz");
        v.export_npz(&p, ExportKind::Raw).unwrap();
        let raw = read_npz(&p).unwrap();
        // 只有深度 1 是直接插入的.
        assert_eq!(raw.index_axis(ndarray::Axis(0), 1), v.layer(1));
        assert!(raw.index_axis(ndarray::Axis(0), 0).iter().all(|&x| x == 0.0));
        assert!(v.layer(0).iter().all(|&x| x > 0.0));
    }

    #[test]
    fn test_physical_coordinate() {
        let v = sample();
        assert_eq!(v.physical_coordinate((1, 2, 3)), (25.0, 50.0, 75.0));
    }

    #[test]
    fn test_compact() {
        let v = sample();
        let c = v.compact().unwrap();
        assert_eq!(c.shape(), (6, 3, 4));
        assert_eq!(c.expand().unwrap(), v);

        let mut broken = c.clone();
        broken.sh = (6, 3, 5);
        assert_eq!(
            broken.expand().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_compact_huge_shape() {
        let mut c = sample().compact().unwrap();
        for sh in [
            (usize::MAX / 2, 3, 1),
            (usize::MAX / 4 + 1, 1, 1),
            (usize::MAX >> 4, 2, 1),
        ] {
            c.sh = sh;
            assert_eq!(c.expand().unwrap_err().kind(), io::ErrorKind::InvalidData);
        }
    }
}
