//! 提示词模板
//!
//! 翻译、润色、致歉三段固定提示词。每次调用都由参数重新拼装，不保留任何
//! 对话历史。

/// 翻译阶段的停止序列：模型写完 SQL 后不再臆造结果
pub const SQL_RESULT_STOP: &str = "\nSQLResult:";

/// 数据所覆盖的业务范围，用于致歉提示词
pub const DOMAIN_DESCRIPTION: &str =
    "real estate prices in the DMV area (Washington DC, Maryland and Virginia)";

/// 问题 → SQL
pub fn translation(question: &str, table_info: &str, top_k: usize) -> String {
    format!(
        r#"You are a PostgreSQL expert. Given an input question, first create a syntactically correct PostgreSQL query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies in the question a specific number of examples to obtain, query for at most {top_k} results using the LIMIT clause as per PostgreSQL. You can order the results to return the most informative data in the database.
Never query for all columns from a table. You must query only the columns that are needed to answer the question. Wrap each column name in double quotes (") to denote them as delimited identifiers.
Pay attention to use only the column names you can see in the tables below. Be careful to not query for columns that do not exist. Also, pay attention to which column is in which table.
Pay attention to use CURRENT_DATE function to get the current date, if the question involves "today".

Use the following format:

Question: Question here
SQLQuery: SQL Query to run
SQLResult: Result of the SQLQuery
Answer: Final answer here

Only use the following tables:
{table_info}

Question: {question}
SQLQuery: "#
    )
}

/// 原始结果 → 自然语言回答
pub fn formatting(question: &str, result: &str) -> String {
    format!(
        r#"You are a helpful assistant that presents database query results in natural language.

Original question: {question}
Raw database result: {result}

Convert this raw result into a clear, concise, and human-friendly answer.
Format any numbers appropriately (with commas for thousands, round to 2 decimal places when needed).
Include units if they are implied by the question (prices should be in dollars).

For lists or multiple items:
- Put each item on a new line using line breaks
- Number items clearly if they represent a ranked list
- Use line breaks between paragraphs for better readability

Example 1:
Question: what is the highest price in alexandria in year 2022?
Raw result: 668226.6417423502
Response: The highest price in Alexandria in 2022 was $668,226.64.

Example 2:
Question: what are the top 5 highest prices in alexandria in year 2022?
Raw result: [(668226.64, '2022-07-31'), (665818.40, '2022-06-30'), ...]
Response: The top five highest prices in Alexandria in 2022 were as follows:

1. $668,226.64 on July 31, 2022
2. $665,818.40 on June 30, 2022
3. $664,866.84 on May 31, 2022
4. $663,810.11 on July 31, 2022
5. $662,475.81 on May 31, 2022

Your response:"#
    )
}

/// 查询失败 → 友好致歉
pub fn apology(question: &str) -> String {
    format!(
        r#"You are a helpful assistant explaining database query issues.
Our database is related to {DOMAIN_DESCRIPTION}.

The user asked: {question}

The database query failed.

Generate a friendly, helpful response that acknowledges we couldn't find the requested data.

Keep your response short and concise, without explanation."#
    )
}
