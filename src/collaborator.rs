// 该文件是 Shanan （山南西风） 项目的一部分。
// src/collaborator.rs - 外部训练/推理协作方
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  config::CommandTemplates,
  input::{DistanceError, cache_url},
};

#[derive(Error, Debug)]
pub enum CollaboratorError {
  #[error("无法启动命令 `{command}`: {source}")]
  Spawn {
    command: String,
    source: std::io::Error,
  },
  #[error("命令 `{command}` 退出状态异常: {status}")]
  Failed { command: String, status: String },
  #[error("步骤 {step} 没有产出文件 {path}")]
  MissingOutput { step: &'static str, path: PathBuf },
  #[error("无法清理旧产出 {path}: {source}")]
  StaleOutput {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("距离缓存地址无效: {0}")]
  Distance(#[from] DistanceError),
}

/// 一个外部步骤的输入与期望产出
#[derive(Debug, Clone)]
pub struct StepContext {
  pub round: u32,
  pub work_dir: PathBuf,
  pub labeled: PathBuf,
  pub unlabeled: PathBuf,
  pub checkpoint: Option<PathBuf>,
  pub output: PathBuf,
}

/// 训练/推理框架的最小接口，各步骤均为阻塞调用
pub trait Collaborator {
  type Error;

  /// 在 `labeled` 上训练，返回检查点路径
  fn train(&mut self, ctx: &StepContext) -> Result<PathBuf, Self::Error>;

  /// 在 `unlabeled` 上推理，返回检测结果 JSON 路径
  fn infer_uncertainty(&mut self, ctx: &StepContext) -> Result<PathBuf, Self::Error>;

  /// 在 `unlabeled`（不确定度池）上推理，返回距离缓存 URL
  fn infer_distances(&mut self, ctx: &StepContext) -> Result<Url, Self::Error>;
}

fn render_template(template: &str, ctx: &StepContext) -> String {
  let round = ctx.round.to_string();
  let checkpoint = ctx
    .checkpoint
    .as_deref()
    .map(|p| p.display().to_string())
    .unwrap_or_default();
  let replacements = [
    ("ROUND", round),
    ("LABELED", ctx.labeled.display().to_string()),
    ("UNLABELED", ctx.unlabeled.display().to_string()),
    ("CHECKPOINT", checkpoint),
    ("OUTPUT", ctx.output.display().to_string()),
    ("WORK_DIR", ctx.work_dir.display().to_string()),
  ];
  let mut out = template.to_string();
  for (key, val) in &replacements {
    let needle = format!("${{{}}}", key);
    out = out.replace(&needle, val);
  }
  out
}

/// 通过 `sh -c` 运行配置中的命令模板
#[derive(Debug, Clone)]
pub struct CommandCollaborator {
  templates: CommandTemplates,
  shell: String,
}

impl CommandCollaborator {
  pub fn new(templates: CommandTemplates) -> Self {
    CommandCollaborator {
      templates,
      shell: "sh".to_string(),
    }
  }

  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = shell.into();
    self
  }

  fn run(&self, step: &'static str, template: &str, ctx: &StepContext) -> Result<(), CollaboratorError> {
    let command = render_template(template, ctx);
    clear_output(&ctx.output)?;
    info!("第 {} 轮 {}: {}", ctx.round, step, command);
    let status = Command::new(&self.shell)
      .arg("-c")
      .arg(&command)
      .current_dir(&ctx.work_dir)
      .status()
      .map_err(|source| CollaboratorError::Spawn {
        command: command.clone(),
        source,
      })?;
    if !status.success() {
      return Err(CollaboratorError::Failed {
        command,
        status: status.to_string(),
      });
    }
    expect_output(step, &ctx.output)?;
    debug!("{} 产出: {}", step, ctx.output.display());
    Ok(())
  }
}

/// 删除上次运行遗留的产出，产出是否存在只由本次命令决定
fn clear_output(path: &Path) -> Result<(), CollaboratorError> {
  match std::fs::remove_file(path) {
    Ok(()) => {
      debug!("删除旧产出: {}", path.display());
      Ok(())
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(CollaboratorError::StaleOutput {
      path: path.to_path_buf(),
      source,
    }),
  }
}

fn expect_output(step: &'static str, path: &Path) -> Result<(), CollaboratorError> {
  if path.exists() {
    Ok(())
  } else {
    Err(CollaboratorError::MissingOutput {
      step,
      path: path.to_path_buf(),
    })
  }
}

impl Collaborator for CommandCollaborator {
  type Error = CollaboratorError;

  fn train(&mut self, ctx: &StepContext) -> Result<PathBuf, Self::Error> {
    self.run("train", &self.templates.train, ctx)?;
    Ok(ctx.output.clone())
  }

  fn infer_uncertainty(&mut self, ctx: &StepContext) -> Result<PathBuf, Self::Error> {
    self.run("infer_uncertainty", &self.templates.infer_uncertainty, ctx)?;
    Ok(ctx.output.clone())
  }

  fn infer_distances(&mut self, ctx: &StepContext) -> Result<Url, Self::Error> {
    self.run("infer_diversity", &self.templates.infer_diversity, ctx)?;
    Ok(cache_url(&self.templates.distance_scheme, &ctx.output)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn context(dir: &Path) -> StepContext {
    StepContext {
      round: 2,
      work_dir: dir.to_path_buf(),
      labeled: dir.join("labeled.json"),
      unlabeled: dir.join("unlabeled.json"),
      checkpoint: None,
      output: dir.join("out.json"),
    }
  }

  fn templates(train: &str) -> CommandTemplates {
    CommandTemplates {
      train: train.to_string(),
      infer_uncertainty: "echo [] > ${OUTPUT}".to_string(),
      infer_diversity: "touch ${OUTPUT}".to_string(),
      distance_scheme: "dist".to_string(),
    }
  }

  #[test]
  fn placeholders_are_substituted() {
    let ctx = StepContext {
      checkpoint: Some(PathBuf::from("/ckpt/latest.pth")),
      ..context(Path::new("/work"))
    };
    let rendered = render_template(
      "train --round ${ROUND} ${LABELED} ${CHECKPOINT} -o ${OUTPUT} -w ${WORK_DIR} ${OTHER}",
      &ctx,
    );
    assert_eq!(
      rendered,
      "train --round 2 /work/labeled.json /ckpt/latest.pth -o /work/out.json -w /work ${OTHER}"
    );
  }

  #[test]
  fn commands_run_and_report_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let mut collaborator = CommandCollaborator::new(templates("touch ${OUTPUT}"));

    assert_eq!(collaborator.train(&ctx).unwrap(), ctx.output);
    assert_eq!(collaborator.infer_uncertainty(&ctx).unwrap(), ctx.output);
    let url = collaborator.infer_distances(&ctx).unwrap();
    assert_eq!(url.scheme(), "dist");
  }

  #[test]
  fn failures_and_missing_outputs_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());

    let mut failing = CommandCollaborator::new(templates("exit 3"));
    assert!(matches!(
      failing.train(&ctx),
      Err(CollaboratorError::Failed { .. })
    ));

    let mut silent = CommandCollaborator::new(templates("true"));
    assert!(matches!(
      silent.train(&ctx),
      Err(CollaboratorError::MissingOutput { step: "train", .. })
    ));
  }

  #[test]
  fn leftover_output_from_an_earlier_run_is_not_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StepContext {
      output: dir.path().join("uncertainty_results.json"),
      ..context(dir.path())
    };
    std::fs::write(&ctx.output, "[]").unwrap();

    let mut collaborator = CommandCollaborator::new(CommandTemplates {
      infer_uncertainty: "true".to_string(),
      ..templates("true")
    });
    assert!(matches!(
      collaborator.infer_uncertainty(&ctx),
      Err(CollaboratorError::MissingOutput {
        step: "infer_uncertainty",
        ..
      })
    ));
    assert!(!ctx.output.exists());
  }
}
