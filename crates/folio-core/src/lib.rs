//! folio-core
//!
//! Core building blocks for Folio, a job-driven textbook generator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, errors, outcome, skeleton, outline, canonical, figure）
//! - **queue**: ジョブレコード・状態遷移・リトライ、JobStore 実装（in-memory / file）
//! - **ports**: 抽象化レイヤー（JobStore, BookStore, LanguageModel, Clock, IdGenerator）
//! - **impls**: ports の実装（BookStore, HttpModel, ScriptedModel）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **generation**: 章オーケストレータと節ジェネレータ
//! - **compiler**: Skeleton → Canonical Document
//! - **figures**: 図版配置マッチャ
//! - **app**: builder, worker loop, reaper, BookService
//! - **config**: `folio.toml`

pub mod app;
pub mod compiler;
pub mod config;
pub mod domain;
pub mod figures;
pub mod generation;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;
