//! 正则步长梯度下降 (regular step gradient descent).

use std::fmt;

/// 参数个数: 三个欧拉角 + 三个平移.
pub const N_PARAMS: usize = 6;

/// 参数向量.
pub type Params = [f64; N_PARAMS];

/// 优化结束的原因.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// 步长松弛到最小步长以下.
    StepTooSmall,
    /// 梯度模长低于容差.
    GradientTolerance,
    /// 达到最大迭代次数.
    MaximumIterations,
    /// 有效采样点不足, 度量无法计算.
    InsufficientSamples,
    /// 未进行优化 (恒等变换模式).
    NotRun,
}

impl StopCondition {
    /// 是否属于正常收敛?
    #[inline]
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::StepTooSmall | Self::GradientTolerance | Self::NotRun)
    }
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StepTooSmall => "step too small",
            Self::GradientTolerance => "gradient magnitude below tolerance",
            Self::MaximumIterations => "maximum number of iterations reached",
            Self::InsufficientSamples => "insufficient valid samples",
            Self::NotRun => "not run",
        };
        f.write_str(s)
    }
}

/// 优化结果.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerReport {
    /// 最终参数.
    pub position: Params,
    /// 最终参数处 (最近一次计算) 的度量值.
    pub value: f64,
    /// 已完成的迭代次数.
    pub iterations: usize,
    /// 结束原因.
    pub stop: StopCondition,
}

/// 正则步长梯度下降优化器 (此处做最大化).
///
/// 每一步沿按 `scales` 缩放后的单位梯度方向前进 `step`; 梯度方向反转时
/// 步长乘以 `relaxation`.
#[derive(Debug, Clone, Copy)]
pub struct RegularStepGradientDescent {
    /// 初始步长.
    pub learning_rate: f64,
    /// 最小步长.
    pub min_step: f64,
    /// 最大迭代次数.
    pub max_iterations: usize,
    /// 松弛因子, 位于 `(0, 1)`.
    pub relaxation: f64,
    /// 梯度模长容差.
    pub gradient_tolerance: f64,
    /// 参数尺度. 梯度的第 `i` 个分量除以 `scales[i]`.
    pub scales: Params,
}

impl RegularStepGradientDescent {
    /// 从 `initial` 出发最大化 `f`.
    ///
    /// `f` 返回度量值和梯度; 返回 `None` 表示度量无法计算, 优化立即结束.
    pub fn maximize<F>(&self, initial: Params, mut f: F) -> OptimizerReport
    where
        F: FnMut(&Params) -> Option<(f64, Params)>,
    {
        let mut position = initial;
        let mut value = f64::NAN;
        let mut step = self.learning_rate;
        let mut previous: Option<Params> = None;

        for iteration in 0..self.max_iterations {
            let Some((v, gradient)) = f(&position) else {
                return self.report(position, value, iteration, StopCondition::InsufficientSamples);
            };
            value = v;

            let mut scaled = gradient;
            scaled
                .iter_mut()
                .zip(self.scales)
                .for_each(|(g, s)| *g /= s);
            let magnitude = scaled.iter().map(|g| g * g).sum::<f64>().sqrt();
            if !magnitude.is_finite() || magnitude < self.gradient_tolerance {
                return self.report(position, value, iteration, StopCondition::GradientTolerance);
            }

            if let Some(prev) = previous {
                let dot: f64 = prev.iter().zip(scaled).map(|(a, b)| a * b).sum();
                if dot < 0.0 {
                    step *= self.relaxation;
                }
            }
            if step < self.min_step {
                return self.report(position, value, iteration, StopCondition::StepTooSmall);
            }

            let factor = step / magnitude;
            position
                .iter_mut()
                .zip(scaled)
                .for_each(|(p, g)| *p += factor * g);
            previous = Some(scaled);
        }

        self.report(
            position,
            value,
            self.max_iterations,
            StopCondition::MaximumIterations,
        )
    }

    #[inline]
    fn report(
        &self,
        position: Params,
        value: f64,
        iterations: usize,
        stop: StopCondition,
    ) -> OptimizerReport {
        OptimizerReport {
            position,
            value,
            iterations,
            stop,
        }
    }
}
