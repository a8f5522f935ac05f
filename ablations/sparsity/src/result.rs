//! 实验结果.

use crate::profile::Profile;
use ccf_berry::Provenance;
use std::io::{self, Write};

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Profile `{name}`:")?;
    writeln!(w, "{S4}Slices: {}", p.get_slices())?;
    writeln!(w, "{S4}Build time: {} us", p.get_build_time_us())?;
    for (label, prov) in [
        ("direct", Provenance::Direct),
        ("stack-filled", Provenance::StackFilled),
        ("interpolated", Provenance::Interpolated),
        ("empty", Provenance::Empty),
    ] {
        let e = p.get_error(prov);
        writeln!(
            w,
            "{S4}{label}: {} voxels, mean abs error {}, max {:.6}",
            e.count(),
            f64_to_display(e.mean()),
            e.max()
        )?;
    }
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(&'static str, Profile)>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Profile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, profile) in self.data.iter() {
            describe_into(key, profile, &mut buf).unwrap();
            utils::sep_to(&mut buf).unwrap();
            print!("{}", String::from_utf8_lossy(&buf));
            buf.clear();
        }
    }
}
