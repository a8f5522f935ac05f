//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道暗灰色.
    pub const DARK_GRAY: u8 = 0b_0100_0000;

    /// 单通道灰色.
    pub const GRAY: u8 = 0b_1000_0000;

    /// 单通道亮灰色.
    pub const LIGHT_GRAY: u8 = 0b_1100_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;
}

/// 图谱范围以外的强度背景值.
pub const BACKGROUND_INTENSITY: f32 = 0.0;

/// 结构 id 网格中 "无结构" 的取值. 图谱范围以外的标签采样也返回该值.
pub const NO_STRUCTURE: u32 = 0;

/// 仿射变换线性部分行列式的绝对值不超过该值时, 视为不可逆.
pub const DEGENERATE_DETERMINANT: f64 = 1e-9;

/// 求解仿射变换所需的最少地标对数.
pub const MIN_LANDMARKS: usize = 3;

/// 地标正规方程矩阵 (归一化后) 允许的最大条件数.
pub const CONDITION_NUMBER_LIMIT: f64 = 1e8;

/// 重建体导出为 npz 时, 唯一数组的名称.
pub const VOLUME_ARRAY_NAME: &str = "array";

/// 各环境变量名.
pub mod env {
    /// 项目切片方向.
    pub const ORIENTATION: &str = "CCF_BERRY_ORIENTATION";

    /// 项目分辨率 (微米).
    pub const RESOLUTION: &str = "CCF_BERRY_RESOLUTION";

    /// 项目根目录.
    pub const PROJECT_DIR: &str = "CCF_BERRY_PROJECT_DIR";
}
