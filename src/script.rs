// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script.rs - 检测例程语言
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

//! 检测例程使用的缩进式小语言：词法、语法、求值。
//!
//! 语言是 Python 的一个子集，只包含编写检测例程需要的部分。
//! 求值器不接触文件系统与进程环境，所有外部交互经由 [`crate::capability::Host`]。

mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod parser;
mod value;

pub use self::ast::{FunctionDef, Parameter, Stmt, StmtKind};
pub use self::builtins::Builtin;
pub use self::error::{ErrorKind, ScriptError};
pub use self::interp::{ExecutionLimits, Interpreter};
pub use self::parser::parse_module;
pub use self::value::{Dict, Env, Function, ImageInfo, Range, Scope, Value};
