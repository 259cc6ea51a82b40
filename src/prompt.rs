//! System prompt assembly.
//!
//! Every mode has a fixed [`ModeTemplate`] (scope, refusal, response style,
//! optional guidance). [`compose_system_prompt`] renders the template and
//! appends whichever context blocks the current step supplies: the activity
//! summary during the decide step, retrieved passages during generation.

use crate::models::{DetectiveMode, Mode};

/// Literal prefix of a planner task line. The desktop UI turns each such
/// line into a checklist row.
pub const TASK_PREFIX: &str = "- [ ] ";

const IDENTITY: &str = "You are Tether, an AI assistant specifically designed to help people with \
ADHD stay focused and productive while they build software.

CORE PRINCIPLES:
- Be encouraging and understanding, never judgmental
- Focus on actionable, specific advice
- Break down complex tasks into smaller steps
- Acknowledge ADHD challenges (executive dysfunction, hyperfocus, time blindness)
- When the user sounds overwhelmed, validate the feeling first, then help with only the very first step";

struct ModeTemplate {
    title: &'static str,
    scope: &'static str,
    refusal: &'static str,
    style: &'static str,
    guidance: Option<&'static str>,
}

const GENERAL: ModeTemplate = ModeTemplate {
    title: "GENERAL",
    scope: "Focus, motivation, productivity strategies, ADHD support, and general questions \
about the user's software work.",
    refusal: "If the user asks for something unrelated to their work, wellbeing, or \
productivity, briefly say it is outside what you help with and steer back to what they are working on.",
    style: "Keep responses concise (2-3 sentences max). Use positive, motivating language.",
    guidance: Some(
        "- If they're struggling with focus: suggest specific techniques (Pomodoro, body doubling, etc.)
- If they're procrastinating: offer gentle accountability and a starting strategy
- If they're hyperfocusing: remind them about breaks and self-care",
    ),
};

const PLANNER: ModeTemplate = ModeTemplate {
    title: "PLANNER",
    scope: "Turning goals and project ideas into small, ordered, achievable tasks; \
prioritizing; realistic timelines.",
    refusal: "Do not write code, commands, or configuration of any kind, not even short \
snippets. If the user asks for code, say that planner mode only plans and suggest switching to builder mode.",
    style: "Short sentences. Each task should take 25 minutes or less and start with a verb.",
    guidance: Some(
        "WORKFLOW:
1. First ask 1-3 clarifying questions about the goal, constraints, and deadline.
2. Only after the user answers, produce the task list.
3. If the user explicitly asks for the tasks right away, skip the questions and produce the list immediately.

TASK LIST FORMAT (NON-NEGOTIABLE):
- Every task is one line starting with exactly `- [ ] ` (dash, space, open bracket, space, close bracket, space).
- Never use numbered lists, `*` bullets, `[x]`, or any other checkbox syntax for tasks.
- The app parses these lines into a checklist, so any other format breaks it.",
    ),
};

const BUILDER: ModeTemplate = ModeTemplate {
    title: "BUILDER",
    scope: "Writing, explaining, and modifying code for the user's current task.",
    refusal: "If the request is not about building software, say so briefly and ask what \
they want to build.",
    style: "Give the smallest working piece of code first, then one sentence on what to do next. \
Avoid long explanations unless asked.",
    guidance: Some(
        "- Prefer one small change at a time over a full rewrite
- Mention where the code goes (file, function) so the user can act immediately",
    ),
};

const DETECTIVE: ModeTemplate = ModeTemplate {
    title: "DETECTIVE",
    scope: "Debugging: error messages, failing tests, unexpected behavior, and how to track \
down their cause.",
    refusal: "If the request is not about a bug or unexpected behavior, say that detective mode \
is for debugging and suggest another mode.",
    style: "Calm and methodical. One hypothesis or step at a time.",
    guidance: None,
};

const REVIEWER: ModeTemplate = ModeTemplate {
    title: "REVIEWER",
    scope: "Reviewing code, designs, and plans the user shares: correctness, readability, \
and risks.",
    refusal: "If there is nothing to review, ask the user to paste the code or describe the \
change. Do not start writing new features.",
    style: "Lead with what is good, then at most three concrete issues ordered by importance.",
    guidance: None,
};

const TEACHING: &str = "DEBUGGING APPROACH (TEACHING):
- Walk through the reasoning out loud: what the symptom tells us and what it rules out
- Offer one or two hypotheses and how to test each
- Let the user try the next step themselves before giving the answer";

const QUICK_FIX: &str = "DEBUGGING APPROACH (QUICK FIX):
- State the most likely root cause in one sentence
- Give the minimal fix directly
- Skip the lesson unless the user asks why";

fn template(mode: Mode) -> &'static ModeTemplate {
    match mode {
        Mode::General => &GENERAL,
        Mode::Planner => &PLANNER,
        Mode::Builder => &BUILDER,
        Mode::Detective => &DETECTIVE,
        Mode::Reviewer => &REVIEWER,
    }
}

/// Inputs for one system prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptContext<'a> {
    pub mode: Mode,
    pub detective_mode: DetectiveMode,
    pub retrieved: Option<&'a str>,
    pub activity: Option<&'a str>,
}

pub fn compose_system_prompt(ctx: &PromptContext<'_>) -> String {
    let t = template(ctx.mode);
    let mut sections = vec![
        IDENTITY.to_string(),
        format!("MODE: {}", t.title),
        format!("SCOPE:\n{}", t.scope),
        format!("OUT OF SCOPE:\n{}", t.refusal),
        format!("RESPONSE STYLE:\n{}", t.style),
    ];

    if let Some(guidance) = t.guidance {
        sections.push(format!("GUIDANCE:\n{}", guidance));
    }
    if ctx.mode == Mode::Detective {
        sections.push(
            match ctx.detective_mode {
                DetectiveMode::Teaching => TEACHING,
                DetectiveMode::QuickFix => QUICK_FIX,
            }
            .to_string(),
        );
    }

    if let Some(activity) = ctx.activity.filter(|a| !a.trim().is_empty()) {
        sections.push(format!(
            "DECISION MAKING:
- For questions about personal history, activities, or \"what was I doing\", use the USER'S ACTIVITY HISTORY below. DO NOT use the retrieve tool for these.
- For questions about ADHD strategies, techniques, or research, use the retrieve tool.
{}",
            activity.trim_end()
        ));
    }

    if let Some(retrieved) = ctx.retrieved.filter(|r| !r.trim().is_empty()) {
        sections.push(format!(
            "RETRIEVED REFERENCE CONTEXT:\n{}\n\nUse the retrieved reference context when it is relevant. \
Respond as Tether in a warm, understanding, and concise way.",
            retrieved.trim_end()
        ));
    }

    sections.join("\n\n")
}

/// Single-shot request for a conversation title.
pub fn title_prompt(first_message: &str) -> String {
    format!(
        "Write a short, descriptive title (at most 6 words) for a conversation that starts with \
the message below. Reply with the title only, without quotes.\n\nMessage: {}",
        first_message.trim()
    )
}

/// Task texts from every line that starts with [`TASK_PREFIX`].
pub fn parse_task_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim_start().strip_prefix(TASK_PREFIX))
        .map(|task| task.trim().to_string())
        .filter(|task| !task.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(mode: Mode) -> String {
        compose_system_prompt(&PromptContext {
            mode,
            ..Default::default()
        })
    }

    #[test]
    fn every_mode_has_scope_refusal_and_style() {
        for mode in Mode::ALL {
            let p = prompt(mode);
            assert!(p.starts_with("You are Tether"), "{mode}");
            assert!(p.contains("SCOPE:\n"), "{mode}");
            assert!(p.contains("OUT OF SCOPE:\n"), "{mode}");
            assert!(p.contains("RESPONSE STYLE:\n"), "{mode}");
            assert!(
                p.contains(&format!("MODE: {}", mode.as_str().to_uppercase())),
                "{mode}"
            );
        }
    }

    #[test]
    fn planner_encodes_task_contract() {
        let p = prompt(Mode::Planner);
        assert!(p.contains("`- [ ] `"));
        assert!(p.contains("Do not write code"));
        assert!(p.contains("clarifying questions"));
        assert!(p.contains("explicitly asks for the tasks right away"));
    }

    #[test]
    fn detective_branches_on_sub_mode() {
        let teaching = compose_system_prompt(&PromptContext {
            mode: Mode::Detective,
            detective_mode: DetectiveMode::Teaching,
            ..Default::default()
        });
        let quick = compose_system_prompt(&PromptContext {
            mode: Mode::Detective,
            detective_mode: DetectiveMode::QuickFix,
            ..Default::default()
        });
        assert!(teaching.contains("(TEACHING)"));
        assert!(!teaching.contains("(QUICK FIX)"));
        assert!(quick.contains("(QUICK FIX)"));
        assert!(!quick.contains("(TEACHING)"));
    }

    #[test]
    fn sub_mode_ignored_outside_detective() {
        let p = compose_system_prompt(&PromptContext {
            mode: Mode::Builder,
            detective_mode: DetectiveMode::QuickFix,
            ..Default::default()
        });
        assert!(!p.contains("QUICK FIX"));
    }

    #[test]
    fn context_blocks_only_when_present() {
        let bare = prompt(Mode::General);
        assert!(!bare.contains("RETRIEVED REFERENCE CONTEXT"));
        assert!(!bare.contains("DECISION MAKING"));

        let with_both = compose_system_prompt(&PromptContext {
            mode: Mode::General,
            detective_mode: DetectiveMode::Teaching,
            retrieved: Some("Source: {}\nContent: body doubling helps"),
            activity: Some("\nUSER'S RECENT ACTIVITY HISTORY:\n- Today (2024-03-15): Used Code (1 times)\n"),
        });
        assert!(with_both.contains("RETRIEVED REFERENCE CONTEXT:\nSource: {}\nContent: body doubling helps"));
        assert!(with_both.contains("DO NOT use the retrieve tool"));
        assert!(with_both.contains("Used Code (1 times)"));
    }

    #[test]
    fn blank_context_is_ignored() {
        let p = compose_system_prompt(&PromptContext {
            retrieved: Some("  "),
            activity: Some(""),
            ..Default::default()
        });
        assert_eq!(p, prompt(Mode::General));
    }

    #[test]
    fn title_prompt_embeds_message() {
        let p = title_prompt("  I want to build a todo app ");
        assert!(p.ends_with("Message: I want to build a todo app"));
    }

    #[test]
    fn task_lines_parsed() {
        let text = "Here's your plan:\n\n- [ ] Set up the repo\n  - [ ] Add a README \n- [x] Done already\n* [ ] wrong bullet\n- [ ] \n1. numbered";
        assert_eq!(parse_task_lines(text), vec!["Set up the repo", "Add a README"]);
    }

    #[test]
    fn no_tasks_in_plain_text() {
        assert!(parse_task_lines("What's the deadline?").is_empty());
    }
}
