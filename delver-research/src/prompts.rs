//! Prompt library
//!
//! Parameterised templates with explicit variable slots, each rendered to
//! a message log whose canonical {role, content} form is handed to the
//! LLM capability. The templates are pure text; nothing here talks to a
//! model.

use delver_core::{Message, MessageLog};

pub(crate) const PLANNER_SYSTEM: &str =
    "You are an advanced reasoning LLM that guides a following search agent \
     to search for relevant information.";

pub(crate) const QUERY_SYSTEM: &str = "You are a systematic research planner.";

const INITIAL_SEARCH_PLAN: &str = "You are an advanced reasoning LLM that specializes in structuring and \
refining research plans. Based on the given user query, you will generate a comprehensive research plan \
that expands on the topic, identifies key areas of investigation, and breaks down the research process \
into actionable steps for a search agent to execute.\n\
Process:\n\n\
Expand the Query:\n\
1. Clarify and enrich the user's query by considering related aspects, possible interpretations, and \
necessary contextual details.\n\
2. Identify any ambiguities and resolve them by assuming the most logical and useful framing of the problem.\n\n\
Identify Key Research Areas:\n\
1. Break down the expanded query into core themes, subtopics, or dimensions of investigation.\n\
2. Determine what information is necessary to provide a comprehensive answer.\n\n\
Define Research Steps:\n\
1. Outline a structured plan with clear steps that guide the search agent on how to gather information.\n\
2. Specify which sources or types of data are most relevant.\n\
3. Prioritize steps based on importance and logical sequence.\n\n\
Suggest Search Strategies:\n\
1. Recommend search terms, keywords, and boolean operators to optimize search efficiency.\n\
2. Identify useful databases, journals, and sources where high-quality information can be found.\n\n\
NO EXPLANATIONS, write plans ONLY!";

const JUDGE_SEARCH_RESULTS: &str = "You are an advanced reasoning LLM that specializes in evaluating research \
results and refining search strategies. Your task is to analyze the search agent's findings, assess their \
relevance and completeness, and generate a structured plan for the next search iteration. Your goal is to \
ensure a thorough and efficient research process that ultimately provides a comprehensive answer to the \
user's query. If you think the gathered information is enough, respond with exactly <done>.\n\
Process:\n\
1. Evaluate Search Results: analyze the retrieved contexts for relevance, credibility and completeness; \
identify missing information, knowledge gaps, or weak sources.\n\
2. Determine Next Steps: based on gaps identified, refine or expand the research focus and suggest \
additional search directions.\n\
3. Generate an Updated Research Plan: provide a structured step-by-step plan for the next search iteration.\n\
NO EXPLANATIONS, write plans ONLY (or the token <done>)!";

const WRITING_PLAN: &str = "You are an advanced reasoning LLM that specializes in generating writing plans \
for research reports. Based on the user's query and the aggregated research contexts, you will create a \
detailed plan for writing a comprehensive report.\n\
Process:\n\
1. Analyze User Query and Contexts: understand the core question and identify the key themes, arguments \
and evidence present in the aggregated contexts.\n\
2. Define Report Structure: outline the main sections and subsections and the logical flow of information.\n\
3. Develop Content Plan: for each section, specify the key points, the evidence to be used, and the \
arguments to be made.\n\
4. Specify Writing Style and Tone.\n\
NO EXPLANATIONS, write plans ONLY!";

const NEXT_QUERIES: &str = "You are an analytical research assistant. Based on the original query, the search \
queries performed so far, the current plan by a planning agent and the extracted contexts from webpages, \
determine if further research is needed. If further research is needed, ONLY provide up to four new search \
queries as a Python list IN ONE LINE (for example, ['new query1', 'new query2']) in PLAIN text, NEVER wrap \
in code env. Do not repeat queries that were already performed. If you believe no further research is \
needed, respond with exactly <done>.\n\
REMEMBER: Output ONLY a Python list or the token <done> WITHOUT any additional text or explanations.";

const FINAL_REPORT: &str = "You are an expert researcher and report writer. Based on the gathered contexts \
above and the original query, write a comprehensive, well-structured, and detailed report that addresses \
the query thoroughly. Include all relevant insights and conclusions without extraneous commentary. \
Math equations should use proper LaTeX syntax in markdown format. \
Properly cite all the VALID and REAL sources inline from 'Gathered Relevant Contexts' with [cite_number] \
and summarize the corresponding bibliography list with their urls in markdown format at the end of your \
report. Ensure that all sources you used are cited inline using the [cite_number] format (e.g., [1], [2]) \
and append a complete bibliography section listing each source with its corresponding URL. NEVER omit the \
bibliography. NEVER make up sources or citations; only use the provided contexts, and if no source was \
used or available, write 'No available sources'.";

/// Render the initial research plan prompt
pub fn plan_initial(query: &str) -> MessageLog {
    MessageLog::from_messages(vec![
        Message::system(PLANNER_SYSTEM),
        Message::user(format!("User Query: {}\n\n{}", query, INITIAL_SEARCH_PLAN)),
    ])
}

/// Render the judge prompt: evaluate gathered contexts against the current
/// plan and produce the plan for the next iteration, or `<done>`.
pub fn plan_judge(query: &str, prior_contexts: &str, prior_plan: &str) -> MessageLog {
    MessageLog::from_messages(vec![
        Message::system(PLANNER_SYSTEM),
        Message::user(format!(
            "User Query: {}\nCurrent Research Plan: {}\nAggregated Contexts from previous searches:\n{}\n\n{}",
            query, prior_plan, prior_contexts, JUDGE_SEARCH_RESULTS
        )),
    ])
}

/// Render the query-generation prompt. The previously used queries are
/// listed so the model avoids repetition.
pub fn queries_from_plan(
    query: &str,
    plan: Option<&str>,
    used_queries: &[String],
    prior_contexts: &str,
) -> MessageLog {
    let mut content = format!("User Query: {}", query);
    if !used_queries.is_empty() {
        content.push_str("\nPrevious Search Queries:");
        for (idx, used) in used_queries.iter().enumerate() {
            content.push_str(&format!("\n{}: {}", idx + 1, used));
        }
    }
    if !prior_contexts.is_empty() {
        content.push_str("\n\nExtracted Relevant Contexts:\n");
        content.push_str(prior_contexts);
    }
    if let Some(plan) = plan {
        content.push_str("\n\nResearch Plan by planning agent:\n");
        content.push_str(plan);
    }
    content.push_str("\n\n");
    content.push_str(NEXT_QUERIES);

    MessageLog::from_messages(vec![Message::system(QUERY_SYSTEM), Message::user(content)])
}

/// Render the page usefulness check; the model answers Yes or No.
pub fn page_useful(query: &str, page_text: &str) -> MessageLog {
    MessageLog::from_messages(vec![
        Message::system("You are a strict and concise evaluator of research relevance."),
        Message::user(format!(
            "User Query: {}\n\nWebpage Content:\n{}\n\n\
             You are a research assistant. Given the user's query and the content of a webpage, \
             determine if the webpage contains information relevant and useful for answering the \
             query. Respond with 'Yes' if the page is useful, or 'No' if it is not. Do not include \
             any extra text.",
            query, page_text
        )),
    ])
}

/// Render the context-extraction prompt
pub fn extract_context(query: &str, search_query: &str, page_text: &str) -> MessageLog {
    MessageLog::from_messages(vec![
        Message::system("You are an expert in extracting and summarizing relevant information."),
        Message::user(format!(
            "User Query: {}\nSearch Query: {}\n\nWebpage Content:\n{}\n\n\
             You are an expert information extractor. Given the user's query, the search query \
             that led to this page, and the webpage content, extract all pieces of information \
             that are relevant to answering the user's query. Return only the relevant context \
             as plain text without commentary.",
            query, search_query, page_text
        )),
    ])
}

/// Render the writing-plan prompt
pub fn writing_plan(query: &str, aggregated_contexts: &str) -> MessageLog {
    MessageLog::from_messages(vec![
        Message::system(
            "You are an advanced reasoning LLM that guides a following writer to write a research report.",
        ),
        Message::user(format!(
            "User Query: {}\nAggregated Contexts: {}\n\n{}",
            query, aggregated_contexts, WRITING_PLAN
        )),
    ])
}

/// Render the final-report prompt
pub fn final_report(
    query: &str,
    writing_plan: Option<&str>,
    aggregated_contexts: &str,
    system_instruction: Option<&str>,
) -> MessageLog {
    let system = match system_instruction {
        Some(instruction) => format!(
            "You are a skilled report writer. There are also some extra system instructions: {}",
            instruction
        ),
        None => "You are a skilled report writer.".to_string(),
    };

    let mut content = format!(
        "User Query: {}\n\nGathered Relevant Contexts:\n{}",
        query, aggregated_contexts
    );
    if let Some(plan) = writing_plan {
        content.push_str(&format!("\n\nWriting plan from a planning agent:\n{}", plan));
    }
    content.push_str(&format!("\n\nWriting Instructions: {}", FINAL_REPORT));

    MessageLog::from_messages(vec![Message::system(system), Message::user(content)])
}

/// Fallback report body used when the model's report comes back implausibly
/// short: hands the full writing prompt back to the user so it can be
/// replayed against another model.
pub fn salvage_report(
    partial: &str,
    query: &str,
    writing_plan: Option<&str>,
    aggregated_contexts: &str,
) -> String {
    let mut parts = vec![
        partial.to_string(),
        "\n\nThis is the writing prompt; please copy it and try again with another model".to_string(),
        "\n\n---\n\n---\n\n".to_string(),
        format!("User Query: {}\n\nGathered Relevant Contexts:\n", query),
        aggregated_contexts.to_string(),
    ];
    if let Some(plan) = writing_plan {
        parts.push(format!("\n\nWriting plan from a planning agent:\n{}", plan));
    }
    parts.push(format!("\n\n{}\n\n---\n\n---", FINAL_REPORT));
    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prompt_lists_previous_queries() {
        let used = vec!["first".to_string(), "second".to_string()];
        let chat = queries_from_plan("topic", Some("the plan"), &used, "ctx").to_chat_messages();
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].role, "system");
        let user = &chat[1].content;
        assert!(user.contains("1: first"));
        assert!(user.contains("2: second"));
        assert!(user.contains("the plan"));
        assert!(user.contains("<done>"));
    }

    #[test]
    fn usefulness_prompt_embeds_page_text() {
        let chat = page_useful("why is the sky blue", "rayleigh scattering").to_chat_messages();
        assert!(chat[1].content.contains("rayleigh scattering"));
        assert!(chat[1].content.contains("'Yes'"));
    }

    #[test]
    fn report_prompt_carries_system_instruction() {
        let chat = final_report("q", Some("wp"), "ctx", Some("be terse")).to_chat_messages();
        assert!(chat[0].content.contains("be terse"));
        assert!(chat[1].content.contains("wp"));
        assert!(chat[1].content.contains("bibliography"));
    }

    #[test]
    fn salvage_embeds_contexts_and_instructions() {
        let salvaged = salvage_report("stub", "q", None, "the contexts");
        assert!(salvaged.starts_with("stub"));
        assert!(salvaged.contains("the contexts"));
        assert!(salvaged.contains("try again with another model"));
    }
}
