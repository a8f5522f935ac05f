//! 程序运行函数.

use crate::profile::Profile;
use crate::result::AblationResult;
use ccf_berry::atlas::ImgWriteVis;
use ccf_berry::prelude::*;
use ccf_berry::volume::build;
use ndarray::{Axis, Zip};
use std::path::Path;
use std::thread;
use utils::loader;

/// 一种切片稀疏度.
#[derive(Copy, Clone, Debug)]
struct Strategy {
    name: &'static str,
    stride: usize,
    half_thickness: usize,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy {
        name: "stride 2",
        stride: 2,
        half_thickness: 0,
    },
    Strategy {
        name: "stride 4",
        stride: 4,
        half_thickness: 0,
    },
    Strategy {
        name: "stride 8",
        stride: 8,
        half_thickness: 0,
    },
    Strategy {
        name: "stride 8, z-stack 1",
        stride: 8,
        half_thickness: 1,
    },
];

/// 每隔 `stride` 层取一张冠状切片, 重建后与真值逐体素比较.
fn measure(atlas: &AtlasVolume, st: Strategy, out: Option<&Path>) -> Profile {
    let o = Orientation::Coronal;
    let n = atlas.depth_len(o);
    let centre = atlas.centre_depth(o) as f64;

    let slices: Vec<AlignedSlice> = (0..n)
        .step_by(st.stride)
        .map(|d| {
            let off = (d as f64 - centre) * atlas.voxel_um();
            let pose = PlanePose::new(off, 0.0, 0.0, atlas, o).expect("depth within atlas");
            let image = atlas.intensity().index_axis(Axis(0), d).to_owned();
            AlignedSlice::new(
                format!("slice {d}"),
                Alignment::new(pose, AffineTransform2D::identity()),
                Ok(image),
            )
        })
        .collect();

    let mut p = Profile::new();
    p.count_slices(slices.len());
    let mut spec = VolumeBuildSpec::new(format!("synthetic/{}", st.name));
    if st.half_thickness > 0 {
        spec = spec.with_z_stack(st.half_thickness);
    }

    p.build_start();
    let (volume, report) = build(&spec, atlas, o, slices);
    p.build_elapsed();
    log::info!(
        "`{}`: {} slices placed, {} collisions",
        st.name,
        report.placed.len(),
        report.collisions.len()
    );

    Zip::from(atlas.intensity())
        .and(volume.intensity())
        .and(volume.provenance())
        .for_each(|&t, &r, &prov| p.count_voxel(prov, t, r));

    if let Some(dir) = out {
        let d = (st.stride / 2).min(n - 1);
        let path = dir.join(format!("{}.png", st.name.replace([' ', ','], "_")));
        if let Err(e) = volume.layer(d).save(&path) {
            log::warn!("Failed to save preview `{}`: {e}", path.display());
        }
    }
    p
}

/// 实际运行.
pub fn run() -> AblationResult {
    let resolution = loader::resolution_from_env();
    let shape = loader::synthetic_shape(resolution, 2);
    let atlas = loader::synthetic_atlas(resolution, shape);
    let out = loader::output_dir_from_env_or_home().filter(|d| std::fs::create_dir_all(d).is_ok());
    log::info!(
        "Synthetic atlas {:?} at {}, {} cpus",
        shape,
        resolution,
        utils::cpus()
    );

    println!("Running ablation studies...");
    thread::scope(|s| {
        let atlas = &atlas;
        let out = out.as_deref();
        let handles = STRATEGIES.map(|st| s.spawn(move || measure(atlas, st, out)));

        AblationResult::from_iter(
            STRATEGIES.iter().map(|st| st.name).zip(
                handles
                    .into_iter()
                    .map(|th| th.join().expect("Thread joining error")),
            ),
        )
    })
}
