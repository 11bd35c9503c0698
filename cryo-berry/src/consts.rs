//! 通用常量.

/// 标签值.
pub mod label {
    /// 背景体素值.
    pub const BACKGROUND: u16 = 0;

    /// 消融区标注中, 被消融 (冷冻) 体素的值.
    pub const ABLATED: u16 = 1;

    /// 解剖结构标注中的主目标结构标签. 掩膜工具只保留该标签.
    pub const PRIMARY: u16 = 1;

    /// 二值掩膜的前景值.
    pub const MASK_FOREGROUND: u16 = 1;
}

/// 每厘米对应的毫米数. 体素体积 (cc) = `sx/10 * sy/10 * sz/10`.
pub const MM_PER_CM: f64 = 10.0;

/// 默认解剖结构表: `(标签, 名称)`.
pub const DEFAULT_ANATOMY: [(u16, &str); 3] = [(1, "TG"), (2, "EUS"), (3, "NVB")];

/// 批处理模式下, 有掩膜配准时结构标签的默认膨胀半径 (体素).
pub const DEFAULT_BATCH_MASK_DILATION: usize = 10;

/// 配准-重采样模式下, 有掩膜配准时结构标签的默认膨胀半径 (体素).
pub const DEFAULT_REGISTER_MASK_DILATION: usize = 30;

/// 判定浮点几何参数是否相等时采用的容差.
pub const GEOMETRY_EPS: f64 = 1e-6;

/// 指示 "无穷远" 的距离值. 消融区为空时, 带符号距离图的所有体素取该值.
pub const FAR_AWAY: f32 = f32::INFINITY;
