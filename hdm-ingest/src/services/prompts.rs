//! Model prompts
//!
//! Prompts are Japanese because the documents are; the JSON field names
//! are the contract with `ModelClassification`, `OcrBundle` and
//! `EventsAndTasks`.

use crate::config::AliasSettings;
use crate::models::{Category, SubCategory};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt::Write;

fn alias_lines(table: &BTreeMap<String, Vec<String>>) -> String {
    let mut out = String::new();
    for (name, aliases) in table {
        let _ = writeln!(out, "{}: {}", name, aliases.join(", "));
    }
    if out.is_empty() {
        out.push_str("（なし）\n");
    }
    out
}

/// Classification prompt for one document
pub fn analysis_prompt(aliases: &AliasSettings, file_name: &str) -> String {
    let categories: String = Category::PROMPTED
        .iter()
        .map(|c| format!("- {}\n", c.label()))
        .collect();
    let sub_categories: String = SubCategory::ALL
        .iter()
        .map(|s| format!("- {}\n", s.label()))
        .collect();

    format!(
        r#"あなたは家庭内書類の整理アシスタントです。以下の画像を解析し、JSON形式で回答してください。

## お子様の名寄せルール
{children}
## 大人の名寄せルール
{adults}
## 出力形式（必ずこのJSON形式で回答）
{{
  "category": "カテゴリ名",
  "child_name": "お子様の名前（名寄せ後の正規名。複数または不明時は空文字）",
  "target_adult": "大人の名前（名寄せ後の正規名。書類の宛先・対象者が大人の場合。不明時は空文字）",
  "target_grade_class": "対象となる学年やクラス名（例：小2、くるみ組、1年生）。固有名詞がない場合に抽出",
  "sub_category": "サブカテゴリ（categoryが{edu}の場合のみ）",
  "is_photo": false,
  "date": "YYYYMMDD形式の日付",
  "summary": "要約（15文字以内、ファイル名に使用）",
  "confidence_score": 0.0
}}

## カテゴリ一覧
{categories}
## サブカテゴリ（{edu}の場合のみ使用）
{sub_categories}
## 判断基準
- 書類の宛先や対象者が大人の場合は target_adult に正規名を設定
- 子供関連の書類は child_name に設定し、categoryを「{edu}」に
- 役所・公共関連は「{life}」、医療・健康関連は「{medical}」に分類
- 金銭・銀行・税務関連は「{money}」に分類
- is_photoがtrueの場合は、categoryを「{photo}」にしてください
- 日付が不明な場合は本日の日付を使用してください
- confidence_scoreは0.0〜1.0の範囲で、解析結果の信頼度を示してください
- 学年やクラス名が記載されている場合は、target_grade_classに抽出してください

## ファイル名
{file_name}
"#,
        children = alias_lines(&aliases.children),
        adults = alias_lines(&aliases.adults),
        categories = categories,
        sub_categories = sub_categories,
        edu = Category::ChildrenEducation.label(),
        life = Category::LifeAdmin.label(),
        medical = Category::HealthMedical.label(),
        money = Category::MoneyTax.label(),
        photo = Category::PhotoOther.label(),
        file_name = file_name,
    )
}

/// Calendar event / task extraction prompt
pub fn events_prompt(file_name: &str, today: NaiveDate) -> String {
    let today_str = today.format("%Y-%m-%d");
    format!(
        r#"あなたは学校のお便りから予定とタスクを抽出するアシスタントです。
以下の画像を解析し、JSON形式で回答してください。

## 出力形式（必ずこのJSON形式で回答）
{{
  "events": [
    {{
      "title": "イベントタイトル",
      "date": "YYYY-MM-DD",
      "start_time": "HH:MM（不明な場合は null）",
      "end_time": "HH:MM（不明な場合は null）",
      "location": "場所（不明な場合は null）",
      "description": "詳細説明"
    }}
  ],
  "tasks": [
    {{
      "title": "タスクタイトル（例：○○の提出）",
      "due_date": "YYYY-MM-DD",
      "notes": "備考"
    }}
  ]
}}

## 判断基準
- events: 日時が確定している行事（運動会、授業参観、保護者会など）
- tasks: 期限がある提出物や準備事項（書類提出、持ち物準備など）

## 注意事項
- 過去の日付（{today}より前）のイベント・タスクは除外してください
- 年が明示されていない場合は、{year}年と仮定してください
- 抽出できる情報がない場合は、eventsとtasksを空配列にしてください

## ファイル名
{file_name}
"#,
        today = today_str,
        year = today.year(),
        file_name = file_name,
    )
}

/// Full-text extraction prompt producing an OCR bundle
pub fn ocr_prompt() -> &'static str {
    r#"この画像/ドキュメントに含まれるテキストをすべて抽出し、JSON形式で回答してください。

## 出力形式（必ずこのJSON形式で回答）
{
  "ocr_text": "抽出した全文（書式は保持せずプレーンテキスト）",
  "facts": ["日付・金額・期限・持ち物など、後から検索したい重要事項（最大10件）"],
  "summary": "内容の要約（1〜2文）",
  "confidence_score": 0.0,
  "quality": {
    "uncertain": false,
    "needs_high_model": false,
    "notes": "読み取りに問題があれば記載"
  }
}

## 注意事項
- 読み取れない箇所がある場合は quality.uncertain を true にしてください
- 手書き・かすれ・複雑なレイアウトでより高性能なモデルが必要と判断した場合は quality.needs_high_model を true にしてください
- confidence_scoreは0.0〜1.0の範囲で、抽出結果の信頼度を示してください
"#
}
