//! Keyword routing of a prompt to one of the default personas.
//!
//! Each domain scores one point per keyword found in the lowercased prompt,
//! two for multi-word phrases. The highest score wins; ties keep the earlier
//! domain and a zero score goes to the general assistant.

/// Where a prompt was routed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub agent_id: &'static str,
    pub role: &'static str,
    pub reasoning: String,
}

struct Domain {
    agent_id: &'static str,
    role: &'static str,
    keywords: &'static [&'static str],
    reason: &'static str,
}

const GENERAL: Domain = Domain {
    agent_id: "hana",
    role: "Assistant",
    keywords: &[],
    reason: "this looks like a general question or request.",
};

const DOMAINS: &[Domain] = &[
    Domain {
        agent_id: "kira",
        role: "Developer",
        keywords: &[
            "code", "bug", "debug", "error", "fix", "function", "implement", "refactor",
            "api", "endpoint", "database", "sql", "algorithm", "data structure",
            "typescript", "javascript", "python", "rust", "java", "c++", "bash",
            "script", "build", "deploy", "compile", "npm", "cargo", "git", "github",
            "unit test", "async", "class", "interface", "library", "package",
            "backend", "frontend", "server", "terminal", "cli", "docker",
            "kubernetes", "ci/cd", "regex", "performance", "optimize", "memory",
            "thread", "syntax", "parse", "lint",
        ],
        reason: "the prompt involves code, programming, or technical implementation.",
    },
    Domain {
        agent_id: "yuki",
        role: "Designer",
        keywords: &[
            "design", "ui", "ux", "layout", "color", "palette", "branding", "logo",
            "font", "typography", "visual", "aesthetic", "mockup", "wireframe", "figma",
            "creative", "graphic", "theme", "icon", "illustration", "responsive",
            "minimalist", "dark mode", "light mode", "animation", "gradient",
            "button", "modal", "navbar", "landing page", "prototype", "user flow",
            "accessibility", "contrast", "whitespace",
        ],
        reason: "the prompt involves design, UI/UX, or creative visual work.",
    },
    Domain {
        agent_id: "ren",
        role: "Planner",
        keywords: &[
            "plan", "planning", "roadmap", "schedule", "timeline", "deadline", "goal",
            "strategy", "organize", "task", "project", "milestone", "sprint", "agile",
            "scrum", "priority", "prioritize", "breakdown", "steps", "phase",
            "workflow", "outline", "agenda", "meeting", "kanban", "backlog",
            "objective", "okr", "kpi", "deliverable", "scope", "estimate",
            "coordinate", "manage", "track", "progress",
        ],
        reason: "the prompt involves planning, organizing, or strategic thinking.",
    },
];

fn score(domain: &Domain, prompt: &str) -> usize {
    domain
        .keywords
        .iter()
        .filter(|kw| prompt.contains(*kw))
        .map(|kw| if kw.contains(' ') { 2 } else { 1 })
        .sum()
}

/// Pick the persona best suited to `prompt`.
pub fn route_prompt(prompt: &str) -> Route {
    let lower = prompt.to_lowercase();
    let mut best = &GENERAL;
    let mut best_score = 0;
    for domain in DOMAINS {
        let s = score(domain, &lower);
        if s > best_score {
            best_score = s;
            best = domain;
        }
    }
    Route {
        agent_id: best.agent_id,
        role: best.role,
        reasoning: format!("Routing to {}: {}", best.role, best.reason),
    }
}
