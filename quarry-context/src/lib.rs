use quarry_types::{ChatMessage, Knowledge, ScoredEntry};
use tracing::debug;

pub use quarry_types::RetrievedKnowledge;

pub const DEFAULT_MAX_CHARS: usize = 12_000;

const DDL_HEADING: &str = "### Table definitions";
const DOC_HEADING: &str = "### Documentation";
const EXAMPLE_HEADING: &str = "### Example questions and queries";

const GENERATION_INSTRUCTIONS: &str = "You are a SQL expert. Use the schema, table definitions, \
documentation and examples below to write one SQL query that answers the user's question. \
Reply with the query in a ```sql fenced block and nothing else.";

/// Packs retrieved knowledge into a prompt context of bounded size.
///
/// Sections appear as schema, table definitions, documentation, then worked
/// examples. Over budget, the lowest-ranked entry across all groups goes
/// first; on equal rank examples go before documentation before DDL. The
/// schema description is never dropped, only cut at the budget.
#[derive(Clone, Debug)]
pub struct ContextAssembler {
    max_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl ContextAssembler {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn build_context(&self, schema: &str, retrieved: &RetrievedKnowledge) -> String {
        let groups = [
            &retrieved.ddl[..],
            &retrieved.documentation[..],
            &retrieved.examples[..],
        ];
        let mut keep = groups.map(|g| g.len());
        let mut dropped = 0usize;

        loop {
            let text = render(schema, groups, keep);
            if text.chars().count() <= self.max_chars {
                if dropped > 0 {
                    debug!(dropped, chars = text.chars().count(), "context trimmed to budget");
                }
                return text;
            }
            if !drop_lowest_ranked(&mut keep) {
                debug!(max_chars = self.max_chars, "schema alone exceeds context budget");
                return text.chars().take(self.max_chars).collect();
            }
            dropped += 1;
        }
    }
}

/// Drop the entry with the highest rank index still kept. Later groups lose
/// ties. Returns false when nothing is left to drop.
fn drop_lowest_ranked(keep: &mut [usize; 3]) -> bool {
    let victim = (0..keep.len())
        .filter(|&g| keep[g] > 0)
        .max_by_key(|&g| (keep[g], g));
    match victim {
        Some(g) => {
            keep[g] -= 1;
            true
        }
        None => false,
    }
}

fn render(schema: &str, groups: [&[ScoredEntry]; 3], keep: [usize; 3]) -> String {
    let mut sections: Vec<String> = Vec::new();
    if !schema.trim().is_empty() {
        sections.push(schema.trim_end().to_string());
    }

    let headings = [DDL_HEADING, DOC_HEADING, EXAMPLE_HEADING];
    for ((entries, n), heading) in groups.iter().zip(keep).zip(headings) {
        if n == 0 {
            continue;
        }
        let body: Vec<String> = entries[..n].iter().map(|e| render_entry(&e.knowledge)).collect();
        sections.push(format!("{heading}\n{}", body.join("\n\n")));
    }
    sections.join("\n\n")
}

fn render_entry(knowledge: &Knowledge) -> String {
    match knowledge {
        Knowledge::Ddl { text } | Knowledge::Documentation { text } => text.trim().to_string(),
        Knowledge::QuestionSql { question, sql } => {
            format!("Q: {}\nA: {}", question.trim(), sql.trim())
        }
    }
}

/// Chat messages for a single query-generation call.
pub fn render_prompt(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(GENERATION_INSTRUCTIONS),
        ChatMessage::user(format!("{context}\n\nQuestion: {}", question.trim())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, knowledge: Knowledge) -> ScoredEntry {
        ScoredEntry {
            id: id.into(),
            knowledge,
            score: 0.5,
        }
    }

    fn ddl(id: &str) -> ScoredEntry {
        hit(
            id,
            Knowledge::Ddl {
                text: format!("CREATE TABLE {id} (x INTEGER);"),
            },
        )
    }

    fn doc(id: &str) -> ScoredEntry {
        hit(
            id,
            Knowledge::Documentation {
                text: format!("note {id}"),
            },
        )
    }

    fn pair(id: &str) -> ScoredEntry {
        hit(
            id,
            Knowledge::QuestionSql {
                question: format!("question {id}?"),
                sql: format!("SELECT * FROM {id}"),
            },
        )
    }

    fn retrieved() -> RetrievedKnowledge {
        RetrievedKnowledge {
            ddl: vec![ddl("t1"), ddl("t2")],
            documentation: vec![doc("d1"), doc("d2")],
            examples: vec![pair("p1"), pair("p2")],
        }
    }

    #[test]
    fn sections_follow_schema_ddl_docs_examples() {
        let ctx = ContextAssembler::default().build_context("Database schema: x", &retrieved());

        let order = [
            "Database schema: x",
            DDL_HEADING,
            "CREATE TABLE t1",
            "CREATE TABLE t2",
            DOC_HEADING,
            "note d1",
            EXAMPLE_HEADING,
            "Q: question p1?\nA: SELECT * FROM p1",
            "Q: question p2?",
        ];
        let positions: Vec<usize> = order.iter().map(|s| ctx.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{ctx}");
    }

    #[test]
    fn over_budget_drops_lowest_ranked_examples_first() {
        let full = ContextAssembler::default().build_context("S", &retrieved());
        let budget = full.chars().count() - 1;

        let ctx = ContextAssembler::new(budget).build_context("S", &retrieved());
        assert!(ctx.chars().count() <= budget);
        assert!(!ctx.contains("question p2?"));
        assert!(ctx.contains("question p1?"));
        assert!(ctx.contains("note d2"));
        assert!(ctx.contains("CREATE TABLE t2"));
    }

    #[test]
    fn second_rank_goes_before_first_rank() {
        let mut keep = [2, 2, 2];
        let mut order = Vec::new();
        while drop_lowest_ranked(&mut keep) {
            order.push(keep);
        }
        assert_eq!(
            order,
            vec![[2, 2, 1], [2, 1, 1], [1, 1, 1], [1, 1, 0], [1, 0, 0], [0, 0, 0]]
        );
    }

    #[test]
    fn schema_is_truncated_but_never_dropped() {
        let schema = "Database schema:\n- orders(id INTEGER, amount REAL)";
        let ctx = ContextAssembler::new(20).build_context(schema, &retrieved());
        assert_eq!(ctx, schema.chars().take(20).collect::<String>());
    }

    #[test]
    fn empty_retrieval_is_just_the_schema() {
        let ctx = ContextAssembler::default().build_context("S", &RetrievedKnowledge::default());
        assert_eq!(ctx, "S");
        let msgs = render_prompt(" How many? ", &ctx);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.ends_with("Question: How many?"));
    }
}
