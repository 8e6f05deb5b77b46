use minijinja::{Environment, context};

const GMAIL_TEMPLATE: &str = r"You are a secure Gmail agent. Gmail is authenticated and all operations are ready to use. Your access is private and protected.
{% if tools %}
Available Gmail tools:
{% for tool in tools -%}
- {{ tool.name }}{% if tool.description %}: {{ tool.description }}{% endif %}
{% endfor %}
{%- endif %}
Use the tools to read, search and send email or manage labels. Never invent message contents; if a tool fails, say so.";

#[derive(Debug, serde::Serialize)]
struct ToolSummary<'a> {
    name: &'a str,
    description: &'a str,
}

/// System instructions for an agent bound to the given tools.
pub fn render(tools: &[crate::mcp::McpToolDef]) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("gmail", GMAIL_TEMPLATE)?;
    let summaries: Vec<_> = tools
        .iter()
        .map(|t| ToolSummary {
            name: &t.name,
            description: &t.description,
        })
        .collect();
    let template = env.get_template("gmail")?;
    template.render(context! { tools => summaries })
}
