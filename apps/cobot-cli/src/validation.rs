//! 输入验证模块

use anyhow::{Context, Result};

/// 关节位置验证器
pub struct JointValidator {
    /// 最小角度（弧度）
    min_angle: f64,
    /// 最大角度（弧度）
    max_angle: f64,
}

impl JointValidator {
    pub fn new(min_angle: f64, max_angle: f64) -> Self {
        Self { min_angle, max_angle }
    }

    /// 默认范围：-2π 到 2π（多圈关节的一圈余量）
    pub fn default_range() -> Self {
        let limit = 2.0 * std::f64::consts::PI;
        Self::new(-limit, limit)
    }

    /// 验证单个关节位置
    pub fn validate_joint(&self, index: usize, position: f64) -> Result<()> {
        if !position.is_finite() {
            anyhow::bail!("关节 J{} 位置无效: {}", index + 1, position);
        }
        if position < self.min_angle || position > self.max_angle {
            anyhow::bail!(
                "关节 J{} 位置 {:.3} rad 超出范围 [{:.3}, {:.3}]",
                index + 1,
                position,
                self.min_angle,
                self.max_angle
            );
        }
        Ok(())
    }

    /// 解析逗号分隔的关节位置并验证
    ///
    /// 数量必须与 `joint_count` 一致。
    pub fn parse_joints(&self, input: &str, joint_count: usize) -> Result<Vec<f64>> {
        let positions: Vec<f64> = input
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .context("解析关节位置失败")?;

        if positions.len() != joint_count {
            anyhow::bail!("需要 {} 个关节位置，得到 {} 个", joint_count, positions.len());
        }

        for (i, &pos) in positions.iter().enumerate() {
            self.validate_joint(i, pos)?;
        }
        Ok(positions)
    }
}
