//! Memory context rendering and welcome-block seeding.

use mentor_core::Result;
use mentor_store::frontmatter::default_title;
use mentor_store::BlockService;
use tracing::info;

/// Labeled template seeded for every new user on first contact.
struct WelcomeBlock {
    label: &'static str,
    title: &'static str,
    template: &'static str,
}

const WELCOME_BLOCKS: &[WelcomeBlock] = &[
    WelcomeBlock {
        label: "origin_story",
        title: "Origin Story",
        template: "## Who I Am At My Best\n\n\
            [Moments when they feel most alive, capable, energized]\n\n\
            ## What I'm Building Toward\n\n\
            [6-12 month vision, concrete goals, why these matter]\n\n\
            ## My Superpowers\n\n\
            [Natural strengths, what comes easily, what others come to them for]\n\n\
            ## My Kryptonite\n\n\
            [What drains them, patterns they fight against, blind spots]\n",
    },
    WelcomeBlock {
        label: "tech_relationship",
        title: "Tech Relationship",
        template: "## Current State\n\n\
            [How they use technology now\u{2014}the good, the bad, the ugly]\n\n\
            ## Where Technology Serves Me\n\n\
            [Tools, apps, patterns that genuinely help]\n\n\
            ## Where I Get Hijacked\n\n\
            [Distraction patterns, default behaviors, time sinks]\n\n\
            ## My Scrolling Triggers\n\n\
            [Emotional states, situations, times when they reach for the phone]\n\n\
            ## What Intentional Would Look Like\n\n\
            [Their vision of technology serving their goals]\n",
    },
    WelcomeBlock {
        label: "ai_partnership",
        title: "AI Partnership",
        template: "## What AI Should Help Me With\n\n\
            [Specific use cases aligned with their goals and strengths]\n\n\
            ## What AI Should Never Do For Me\n\n\
            [Protected areas\u{2014}judgment, relationships, creative voice, etc.]\n\n\
            ## My Definition of Superhuman\n\n\
            [What \"becoming more fully themselves, amplified\" means for them]\n\n\
            ## Guardrails\n\n\
            [Signs that AI use is becoming unhealthy or dependency-forming]\n",
    },
    WelcomeBlock {
        label: "onboarding_progress",
        title: "Current Progress",
        template: "## Status\n\n\
            User is working their way through the Welcome module:\n\n\
            [ ] Phase 1: Presence (Who are you?)\n\
            [ ] Phase 2: Patterns (How do you relate to tech?)\n\
            [ ] Phase 3: Possibilities (How might AI serve you?)\n\
            [ ] Graduated\n\n\
            ## Key Moments\n\n\
            [Breakthrough insights, memorable exchanges, turning points]\n\n\
            ## Open Threads\n\n\
            [Questions still being explored, topics to return to]\n",
    },
];

/// Seed the welcome blocks for a user who has none yet.
///
/// Returns true when blocks were created (new user). Idempotent: a user
/// with any existing block is left untouched.
pub async fn ensure_welcome_blocks(blocks: &BlockService, user_id: &str) -> Result<bool> {
    blocks.init_user(user_id).await?;
    if !blocks.list_blocks(user_id).await?.is_empty() {
        return Ok(false);
    }

    info!(user_id = %user_id, "initializing welcome blocks");
    for tmpl in WELCOME_BLOCKS {
        blocks
            .write_block(
                user_id,
                tmpl.label,
                tmpl.template,
                Some(&format!("Initialize {} from welcome template", tmpl.label)),
                "system",
                None,
                Some(tmpl.title),
            )
            .await?;
    }
    info!(user_id = %user_id, count = WELCOME_BLOCKS.len(), "welcome blocks initialized");
    Ok(true)
}

/// Render the memory context section injected into agent instructions.
///
/// Output format is load-bearing and must stay byte-stable:
///
/// ```text
/// ## Student Memory
///
/// ### {title} (label: `{label}`)
///
/// {body}
/// ```
///
/// Returns an empty string when no blocks match. Only title, label, and
/// body are emitted; no other metadata leaks into prompts.
pub async fn build_memory_context(
    blocks: &BlockService,
    user_id: &str,
    labels: Option<&[String]>,
) -> Result<String> {
    let mut all = blocks.list_blocks(user_id).await?;
    if let Some(labels) = labels {
        all.retain(|b| labels.iter().any(|l| l == &b.label));
    }
    if all.is_empty() {
        return Ok(String::new());
    }

    let mut sections = vec!["## Student Memory\n".to_string()];
    for block in &all {
        let title = block
            .title
            .clone()
            .unwrap_or_else(|| default_title(&block.label));
        let body = if block.body.is_empty() {
            "(empty)"
        } else {
            block.body.as_str()
        };
        sections.push(format!("### {title} (label: `{}`)\n\n{body}\n", block.label));
    }
    Ok(sections.join("\n"))
}
