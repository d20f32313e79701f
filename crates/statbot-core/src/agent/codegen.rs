//! Code generation for analysis questions.
//!
//! [`CodeGenerator`] is the seam where an LLM backend would plug in. The
//! built-in [`TemplateGenerator`] classifies the question against the table
//! schema and instantiates a matching analysis template. Every template is
//! written to pass static validation: module-level statements only, table
//! access through `df`, charts through `plt`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AgentError, AgentResult};
use crate::sandbox::runner::FailureCategory;
use crate::table::TableSchema;

/// One failed execution, fed back into [`CodeGenerator::revise`].
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub code: String,
    pub error: String,
    pub category: FailureCategory,
    pub attempt: u32,
}

/// Produces candidate programs for a question over a table.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// First candidate for a question.
    async fn initial(&self, question: &str, schema: &TableSchema) -> AgentResult<String>;

    /// Revised candidate after a failed execution.
    async fn revise(
        &self,
        question: &str,
        schema: &TableSchema,
        failed: &FailedAttempt,
    ) -> AgentResult<String>;
}

static TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:total|sum(?:\s+of)?)\s+(\w+)\s+(?:in|for)\s+(\w+)")
        .unwrap_or_else(|e| panic!("total pattern: {}", e))
});

static GROUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+)\s+by\s+(\w+)").unwrap_or_else(|e| panic!("group pattern: {}", e))
});

/// Escapes a string for interpolation into a single-quoted Python literal.
fn py_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Python list literal of quoted names.
fn py_name_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", py_str(n))).collect();
    format!("[{}]", quoted.join(", "))
}

fn find_column<'a>(schema: &'a TableSchema, word: &str) -> Option<&'a String> {
    schema
        .columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(word))
}

fn find_numeric<'a>(schema: &'a TableSchema, word: &str) -> Option<&'a String> {
    schema
        .numeric_columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(word))
}

/// Deterministic, schema-grounded generator.
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    fn classify(&self, question: &str, schema: &TableSchema) -> String {
        let q = question.to_lowercase();

        if let Some(caps) = TOTAL_RE.captures(&q) {
            let metric_word = &caps[1];
            let target_word = &caps[2];
            if let Some(metric) = find_numeric(schema, metric_word) {
                if find_column(schema, target_word).is_some() {
                    // "total sales in region": the target is a column, so the
                    // question is an overall total.
                    return overall_total(metric);
                }
                if let Some(filter_col) = pick_filter_column(schema) {
                    return filtered_total(metric, filter_col, target_word);
                }
                return overall_total(metric);
            }
        }

        let wants_comparison = [
            "compare",
            "comparison",
            "highest",
            "lowest",
            "top",
            "most",
            "least",
        ]
        .iter()
        .any(|kw| q.contains(kw));
        if wants_comparison {
            let metric = schema
                .numeric_columns
                .iter()
                .find(|c| q.contains(&c.to_lowercase()))
                .or_else(|| schema.numeric_columns.first());
            let group = schema
                .categorical_columns
                .iter()
                .find(|c| q.contains(&c.to_lowercase()))
                .or_else(|| pick_filter_column(schema));
            if let (Some(metric), Some(group)) = (metric, group) {
                return comparison(metric, group);
            }
        }

        if let Some(caps) = GROUP_RE.captures(&q) {
            let metric = find_numeric(schema, &caps[1]);
            let group = find_column(schema, &caps[2]);
            if let (Some(metric), Some(group)) = (metric, group) {
                return group_by(metric, group);
            }
        }

        let wants_chart = ["histogram", "distribution", "chart", "plot", "graph", "visual"]
            .iter()
            .any(|kw| q.contains(kw));
        if wants_chart {
            if let Some(col) = schema.numeric_columns.first() {
                return histogram(col);
            }
        }

        let wants_stats = ["average", "mean", "median", "statistic", "describe", "summary"]
            .iter()
            .any(|kw| q.contains(kw));
        if wants_stats && !schema.numeric_columns.is_empty() {
            return numeric_summary(&schema.numeric_columns);
        }

        overview()
    }
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    async fn initial(&self, question: &str, schema: &TableSchema) -> AgentResult<String> {
        if schema.columns.is_empty() {
            return Err(AgentError::CodeGen("table has no columns".into()));
        }
        Ok(self.classify(question, schema))
    }

    async fn revise(
        &self,
        _question: &str,
        schema: &TableSchema,
        failed: &FailedAttempt,
    ) -> AgentResult<String> {
        match &failed.category {
            // A missing-column failure means the previous template guessed a
            // name wrong; fall back to code that only uses schema names.
            FailureCategory::Runtime { type_name } if type_name == "KeyError" => Ok(overview()),
            FailureCategory::ResourceExhaustion => Ok(head_preview()),
            FailureCategory::Interruption => Ok(head_preview()),
            FailureCategory::Runtime { .. } => {
                if failed.code.contains("plt.") && !schema.numeric_columns.is_empty() {
                    // The chart path failed; answer numerically instead.
                    Ok(numeric_summary(&schema.numeric_columns))
                } else {
                    Ok(overview())
                }
            }
        }
    }
}

/// Prefers a conventional grouping column for value filters.
fn pick_filter_column(schema: &TableSchema) -> Option<&String> {
    const PREFERRED: [&str; 5] = ["region", "category", "type", "group", "name"];
    schema
        .categorical_columns
        .iter()
        .find(|c| {
            let lc = c.to_lowercase();
            PREFERRED.iter().any(|p| lc.contains(p))
        })
        .or_else(|| schema.categorical_columns.first())
}

fn overall_total(metric: &str) -> String {
    let metric = py_str(metric);
    format!(
        "values = [row['{metric}'] for row in df.rows() if row['{metric}'] is not None]\n\
         print('Total {metric}:', sum(values))\n"
    )
}

fn filtered_total(metric: &str, filter_col: &str, value: &str) -> String {
    let metric = py_str(metric);
    let filter_col = py_str(filter_col);
    let value = py_str(value);
    format!(
        "matches = [row['{metric}'] for row in df.rows() \
         if str(row['{filter_col}']).lower() == '{value}' and row['{metric}'] is not None]\n\
         if matches:\n\
         \x20   print('Total {metric} for {value}:', sum(matches))\n\
         else:\n\
         \x20   print('No rows found where {filter_col} equals {value}')\n"
    )
}

fn group_by(metric: &str, group: &str) -> String {
    let metric = py_str(metric);
    let group = py_str(group);
    format!(
        "groups = {{}}\n\
         for row in df.rows():\n\
         \x20   key = str(row['{group}'])\n\
         \x20   groups[key] = groups.get(key, 0) + (row['{metric}'] or 0)\n\
         labels = sorted(groups)\n\
         for k in labels:\n\
         \x20   print(k, '->', groups[k])\n\
         plt.figure()\n\
         plt.bar(labels, [groups[k] for k in labels])\n\
         plt.title('{metric} by {group}')\n\
         plt.xlabel('{group}')\n\
         plt.ylabel('{metric}')\n"
    )
}

fn comparison(metric: &str, group: &str) -> String {
    let metric = py_str(metric);
    let group = py_str(group);
    format!(
        "groups = {{}}\n\
         for row in df.rows():\n\
         \x20   key = str(row['{group}'])\n\
         \x20   groups[key] = groups.get(key, 0) + (row['{metric}'] or 0)\n\
         ranked = sorted(groups.items(), key=lambda item: item[1], reverse=True)\n\
         for k, v in ranked:\n\
         \x20   print(k, '->', v)\n\
         if ranked:\n\
         \x20   print('Highest {metric}:', ranked[0][0], 'with', ranked[0][1])\n\
         \x20   print('Lowest {metric}:', ranked[-1][0], 'with', ranked[-1][1])\n\
         else:\n\
         \x20   print('No rows to compare')\n"
    )
}

fn histogram(col: &str) -> String {
    let col = py_str(col);
    format!(
        "values = df.numeric('{col}')\n\
         if values:\n\
         \x20   plt.figure()\n\
         \x20   plt.hist(values, bins=10)\n\
         \x20   plt.title('Distribution of {col}')\n\
         \x20   plt.xlabel('{col}')\n\
         \x20   plt.ylabel('count')\n\
         \x20   print('Distribution of {col} over', len(values), 'values')\n\
         else:\n\
         \x20   print('No numeric values in {col}')\n"
    )
}

fn numeric_summary(columns: &[String]) -> String {
    format!(
        "for name in {}:\n\
         \x20   values = df.numeric(name)\n\
         \x20   if values:\n\
         \x20       avg = sum(values) / len(values)\n\
         \x20       print(name, 'count:', len(values), 'min:', min(values), \
         'max:', max(values), 'mean:', round(avg, 2))\n\
         \x20   else:\n\
         \x20       print(name, 'has no numeric values')\n",
        py_name_list(columns)
    )
}

fn overview() -> String {
    "counts = df.shape()\n\
     print('The table has', counts[0], 'rows and', counts[1], 'columns')\n\
     print('Columns:', ', '.join(df.columns()))\n\
     for row in df.head(3):\n\
     \x20   print(row)\n"
        .to_string()
}

fn head_preview() -> String {
    "for row in df.head(5):\n\
     \x20   print(row)\n\
     print('Showing the first rows only; the full computation exceeded resource limits')\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::policy::ExecPolicy;
    use crate::sandbox::validator::StaticValidator;
    use std::sync::Arc;

    fn schema() -> TableSchema {
        TableSchema {
            columns: vec!["region".into(), "sales".into(), "marketing_spend".into()],
            numeric_columns: vec!["sales".into(), "marketing_spend".into()],
            categorical_columns: vec!["region".into()],
            row_count: 4,
        }
    }

    fn validator() -> StaticValidator {
        StaticValidator::new(Arc::new(ExecPolicy::default())).unwrap()
    }

    #[tokio::test]
    async fn test_filtered_total_template() {
        let gen = TemplateGenerator::new();
        let code = gen.initial("total sales in north", &schema()).await.unwrap();
        assert!(code.contains("row['sales']"));
        assert!(code.contains("row['region']"));
        assert!(code.contains("north"));
    }

    #[tokio::test]
    async fn test_group_by_template_draws_chart() {
        let gen = TemplateGenerator::new();
        let code = gen.initial("show sales by region", &schema()).await.unwrap();
        assert!(code.contains("plt.bar"));
        assert!(code.contains("row['region']"));
    }

    #[tokio::test]
    async fn test_comparison_template_ranks_groups() {
        let gen = TemplateGenerator::new();
        let code = gen
            .initial("which region has the highest sales?", &schema())
            .await
            .unwrap();
        assert!(code.contains("row['sales']"));
        assert!(code.contains("row['region']"));
        assert!(code.contains("Highest sales"));
        assert!(code.contains("Lowest sales"));
    }

    #[tokio::test]
    async fn test_comparison_template_picks_mentioned_metric() {
        let gen = TemplateGenerator::new();
        let code = gen
            .initial("compare marketing_spend across regions", &schema())
            .await
            .unwrap();
        assert!(code.contains("row['marketing_spend']"));
        assert!(!code.contains("row['sales']"));
    }

    #[tokio::test]
    async fn test_stats_template_for_average_question() {
        let gen = TemplateGenerator::new();
        let code = gen
            .initial("what is the average marketing spend?", &schema())
            .await
            .unwrap();
        assert!(code.contains("df.numeric(name)"));
        assert!(code.contains("'sales', 'marketing_spend'"));
    }

    #[tokio::test]
    async fn test_unknown_question_falls_back_to_overview() {
        let gen = TemplateGenerator::new();
        let code = gen.initial("tell me something", &schema()).await.unwrap();
        assert!(code.contains("df.head(3)"));
    }

    #[tokio::test]
    async fn test_all_templates_pass_static_validation() {
        let gen = TemplateGenerator::new();
        let v = validator();
        let questions = [
            "total sales in north",
            "total sales in region",
            "sales by region",
            "which region has the highest sales?",
            "compare sales across regions",
            "plot the distribution of sales",
            "give me summary statistics",
            "anything else",
        ];
        for question in questions {
            let code = gen.initial(question, &schema()).await.unwrap();
            v.validate(&code)
                .unwrap_or_else(|e| panic!("template for {:?} rejected: {}", question, e));
        }
    }

    #[tokio::test]
    async fn test_revision_after_key_error_uses_schema_only() {
        let gen = TemplateGenerator::new();
        let failed = FailedAttempt {
            code: "print(row['profit'])".into(),
            error: "KeyError: 'profit'".into(),
            category: FailureCategory::Runtime {
                type_name: "KeyError".into(),
            },
            attempt: 1,
        };
        let code = gen.revise("total profit", &schema(), &failed).await.unwrap();
        assert!(!code.contains("profit"));
        validator().validate(&code).unwrap();
    }

    #[tokio::test]
    async fn test_revision_after_resource_exhaustion_limits_rows() {
        let gen = TemplateGenerator::new();
        let failed = FailedAttempt {
            code: "x = [0] * 10".into(),
            error: "MemoryError: out of memory".into(),
            category: FailureCategory::ResourceExhaustion,
            attempt: 2,
        };
        let code = gen.revise("anything", &schema(), &failed).await.unwrap();
        assert!(code.contains("df.head(5)"));
        validator().validate(&code).unwrap();
    }

    #[tokio::test]
    async fn test_quotes_in_column_names_are_escaped() {
        let schema = TableSchema {
            columns: vec!["it's".into()],
            numeric_columns: vec!["it's".into()],
            categorical_columns: vec![],
            row_count: 1,
        };
        let code = TemplateGenerator::new()
            .initial("total it's for anything", &schema)
            .await
            .unwrap();
        assert!(code.contains("it\\'s") || !code.contains("it's"));
    }
}
