//! 工具调用系统提示

use crate::tools::ToolSpec;

const PREAMBLE: &str = "你是一个智能助手，可以根据用户的指令选择合适的工具完成任务。";

const GUIDANCE: &str = "如果不确定如何处理某个任务，可以询问用户是否需要帮助。\n\
如果某个工具返回错误，请如实告知用户该工具可能存在问题，不要编造结果。";

/// 生成系统提示：工具清单每行 `name: description`，之后追加调用方提示
pub fn create_prompt(tools: &[ToolSpec], suffix: Option<&str>) -> String {
    let listing = tools
        .iter()
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "{}\n\n你有以下工具可供使用：\n{}\n\n{}\n",
        PREAMBLE, listing, GUIDANCE
    );
    if let Some(extra) = suffix.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, description: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            version: "1.0".to_string(),
            description: description.to_string(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
            returns: None,
        }
    }

    #[test]
    fn test_lists_tools_in_order() {
        let prompt = create_prompt(
            &[spec("weather_tool", "查询天气"), spec("time_tool", "查询当前时间")],
            None,
        );
        let weather = prompt.find("weather_tool: 查询天气").unwrap();
        let time = prompt.find("time_tool: 查询当前时间").unwrap();
        assert!(weather < time);
    }

    #[test]
    fn test_appends_suffix() {
        let prompt = create_prompt(&[], Some("请用中文回答"));
        assert!(prompt.trim_end().ends_with("请用中文回答"));
        assert!(!create_prompt(&[], Some("   ")).contains("\n\n\n\n"));
    }
}
