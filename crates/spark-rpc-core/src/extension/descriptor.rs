//! 扩展描述文件解析：`name=implementation` 行格式。
//!
//! - `#` 之后的内容视为注释；空行忽略；
//! - 缺少 `=`、名称为空或实现标识为空的行均为致命错误，错误中携带行号与原始文本。

use std::borrow::Cow;

use crate::error::ExtensionError;

/// 一份待加载的描述资源。
#[derive(Clone, Debug)]
pub(crate) struct DescriptorSource {
    pub(crate) name: String,
    pub(crate) text: Cow<'static, str>,
}

/// 解析出的单个条目。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DescriptorEntry {
    pub(crate) name: String,
    pub(crate) implementation: String,
    pub(crate) line: usize,
}

pub(crate) fn parse(
    capability: &'static str,
    source: &DescriptorSource,
) -> Result<Vec<DescriptorEntry>, ExtensionError> {
    let mut entries = Vec::new();
    for (index, raw) in source.text.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let malformed = || ExtensionError::MalformedDescriptor {
            capability,
            source_name: source.name.clone(),
            line: index + 1,
            text: raw.to_owned(),
        };
        let (name, implementation) = content.split_once('=').ok_or_else(malformed)?;
        let (name, implementation) = (name.trim(), implementation.trim());
        if name.is_empty() || implementation.is_empty() {
            return Err(malformed());
        }
        entries.push(DescriptorEntry {
            name: name.to_owned(),
            implementation: implementation.to_owned(),
            line: index + 1,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &'static str) -> DescriptorSource {
        DescriptorSource {
            name: "test/serialization".into(),
            text: Cow::Borrowed(text),
        }
    }

    /// 注释、空行与行尾注释被忽略。
    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let entries = parse(
            "serialization",
            &source("# header\n\npostcard = spark.postcard\njson=spark.json # text\n"),
        )
        .expect("合法描述文件应解析成功");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "postcard");
        assert_eq!(entries[0].implementation, "spark.postcard");
        assert_eq!(entries[1].line, 4);
    }

    /// 缺少 `=` 的行报告行号与原文。
    #[test]
    fn malformed_line_reports_line_context() {
        let err = parse("serialization", &source("postcard=spark.postcard\nbroken line\n"))
            .expect_err("缺少 `=` 的行必须失败");
        match err {
            ExtensionError::MalformedDescriptor { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "broken line");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// 名称为空同样视为格式错误。
    #[test]
    fn empty_name_is_malformed() {
        assert!(parse("codec", &source("=spark.codec")).is_err());
        assert!(parse("codec", &source("default=")).is_err());
    }
}
