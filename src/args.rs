// 该文件是 Shouwang （守望） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Shouwang 检测状态服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（TOML）
  #[arg(long, short, value_name = "FILE", default_value = "config/shouwang.toml")]
  pub config: PathBuf,

  /// 覆盖配置中的监听地址
  #[arg(long, value_name = "HOST")]
  pub host: Option<String>,

  /// 覆盖配置中的监听端口
  #[arg(long, value_name = "PORT")]
  pub port: Option<u16>,
}
