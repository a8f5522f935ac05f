//! 对 `ccf-berry` 配置与图谱的更一层封装. 提供实验用的数据加载器.

use ccf_berry::atlas::{AtlasVolume, Resolution};
use ccf_berry::Idx3d;
use ndarray::Array3;
use std::env;
use std::path::PathBuf;

/// 获取实验输出路径.
///
/// 1. 若环境变量 `$CCF_BERRY_ABLATION_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/ccf-berry/ablation`.
pub fn output_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("CCF_BERRY_ABLATION_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.extend(["ccf-berry", "ablation"]);
            Some(ans)
        }
    }
}

/// 获取实验分辨率: `$CCF_BERRY_RESOLUTION`, 默认 100 微米.
pub fn resolution_from_env() -> Resolution {
    env::var(ccf_berry::consts::env::RESOLUTION)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Resolution::Um100)
}

/// 合成图谱的形状: 真实图谱各轴缩小 `shrink` 倍 (至少 1).
pub fn synthetic_shape(resolution: Resolution, shrink: usize) -> Idx3d {
    let (a, b, c) = resolution.atlas_shape();
    let s = shrink.max(1);
    ((a / s).max(1), (b / s).max(1), (c / s).max(1))
}

/// 合成图谱.
///
/// 强度沿三个轴都是平滑的正弦叠加, 并在 AP 方向带一个缓慢的线性趋势;
/// 结构 id 把 AP 轴四等分, 依次为 `1..=4`.
pub fn synthetic_atlas(resolution: Resolution, shape: Idx3d) -> AtlasVolume {
    let (na, nb, nc) = shape;
    let intensity = Array3::from_shape_fn(shape, |(a, b, c)| {
        let fa = a as f32 / na as f32;
        let fb = b as f32 / nb as f32;
        let fc = c as f32 / nc as f32;
        let wave = (fa * 9.0).sin() * 20.0 + (fb * 5.0).cos() * 10.0 + (fc * 7.0).sin() * 5.0;
        100.0 + 40.0 * fa + wave
    });
    let labels = Array3::from_shape_fn(shape, |(a, _, _)| (4 * a / na.max(1)) as u32 + 1);
    AtlasVolume::fake(resolution, intensity, labels).expect("synthetic grids share one shape")
}
