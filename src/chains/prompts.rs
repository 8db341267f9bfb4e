//! Prompt templates.
//!
//! Placeholders use `{name}` and are filled by [`render`]. Values are
//! substituted in a single pass, so text inside a value that looks like a
//! placeholder is never expanded.

/// Human description of the searchable ETF table, handed to query
/// generation together with the schema read from the database.
pub const ETF_TABLE_DESCRIPTION: &str = r#"The table contains the following columns:
- "isin": the ISIN of the ETF, it uniquely identifies it,
- "ticker": the ETF ticker,
- "name": the name of the ETF,
- "index": the index that the ETF replicates,
- "inception_date": the date in which the ETF was created,
- "age_in_years": the number of years since the ETF was created,
- "strategy": the investment strategy in terms of time horizon,
- "domicile_country": the country of domicile of the ETF,
- "currency": the currency of the ETF,
- "hedged": indicates if the fund is hedged or not,
- "securities_lending": indicates if the ETF lends securities to third parties or not,
- "dividends": the strategy used for handling dividends, either 'Distributing' or 'Accumulating',
- "ter": the Total Expense Ratio of the ETF, the annual cost as a percentage of the investment,
- "replication": the replication strategy, one of 'Full replication', 'Optimized sampling' or 'Swap based Unfunded',
- "size": the amount of money invested in the fund, in millions of euros,
- "is_sustainable": whether or not the ETF is sustainable,
- "number of holdings": how many holdings are in the fund (if available),
- "asset": the asset class of the ETF,
- "instrument": the instrument type,
- "region": the region of the ETF,
- "Borsa Italiana", "London", "Stuttgart", "gettex", "Euronext Amsterdam", "Euronext Paris", "XETRA", "SIX Swiss Exchange", "Euronext Brussels": whether the ETF is exchanged at that venue or not
"#;

pub const QUERY_GENERATION_SYSTEM: &str = r#"You are an assistant designed to answer user questions.
You have access to a {dialect} database of ETFs with the tables described below.
If the LAST user question involves extracting data from this database, generate a correct SQL query to find all ETFs that match the user request.
You can use any column for filtering and you MUST select ALL columns of each ETF found.
Always wrap column and table names in double quotes.
Otherwise, you can directly answer the user question.

Database tables description:
{tables}

You must call exactly one of two tools:
    - 'query_database' if you need to extract data from the database to answer the user
    - 'answer_directly' if the last question does not involve the database
"#;

pub const QUERY_DATABASE_TOOL: &str = "query_database";
pub const QUERY_DATABASE_DESCRIPTION: &str =
    "Executes the SQL query to retrieve the data from the database.";
pub const ANSWER_DIRECTLY_TOOL: &str = "answer_directly";
pub const ANSWER_DIRECTLY_DESCRIPTION: &str =
    "Directly answer the user if the question does not require extracting data from the database.";

pub const FILTER_EXTRACTION: &str = r#"Given the {dialect} query reported below, your task is to extract all values being used as filtering condition by a LIKE, IN or = operator within a WHERE clause.
Return a json object with a single key 'filters' containing the list of filters found matching the given condition.
Each element in the list must contain:
- a field 'column' with the column on which the filtering condition is applied
- a field 'value' with the value being used as filtering condition in the LIKE, IN or = operator
For the IN operator treat each element as its own individual filter.

Query:
{query}
"#;

pub const ANSWER_NO_RESULTS: &str = r#"Your task is to respond to the user question based solely on the previous messages in the conversation. The database query generated for this question found no ETFs: tell the user that nothing matched and, if it helps, suggest relaxing some of the conditions.

Question:
{question}

Previous messages:
{history}

Query executed:
{query}
"#;

pub const ANSWER_FEW_RESULTS: &str = r#"Your task is to respond to the user question based solely on the previous messages in the conversation and the list of ETFs found in the database.

Question:
{question}

Previous messages:
{history}

ETFs found in the database:
{results}
"#;

pub const ANSWER_MANY_RESULTS: &str = r#"Your task is to respond to the user question by informing them of the number of ETFs that were found in the database and inviting them to consult the table containing the ETFs found (the table is shown by the frontend, it is not your job to create it).
You are also provided with some suggestions of additional information you can invite the user to provide to further narrow down the search.

Question:
{question}

Previous messages:
{history}

Number of ETFs found:
{n_results}

Suggestions:
{suggestions}
"#;

pub const CONDENSE_QUESTION: &str = r#"Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question, in its original language.

Chat History:
{history}
Follow Up Input: {question}
Standalone question:"#;

/// Assistant turn that grounds the answer in the retrieved context.
pub const RAG_CONTEXT: &str = r#"I should answer the question based ONLY on the previous messages and the following context:
{context}"#;

pub const SOURCE_FILTER: &str = r#"Given a question, the generated answer and a source document, return YES if information from the source document is useful for answering the question and NO if it isn't.

> Question:
>>
{question}
<<

> Answer:
>>
{answer}
<<

> Source document:
>>
{source}
<<

Relevant (YES/NO):"#;

pub const CAPTION_FILTER: &str = r#"Given the following caption of an image, return YES if the caption is about a graph, a plot or a scale and NO if it isn't.
In particular you should return NO if the image is a logo, a title or a header.

> Image Caption: {caption}
> Relevant (YES / NO):"#;

pub const IMAGE_CAPTION: &str =
    "Describe the image in detail. Be specific about graphs, such as bar plots.";

pub const TABLE_SUMMARY: &str = r#"You are an assistant tasked with summarizing tables and text.
Give a concise summary of the table or text. Table or text chunk: {element}"#;

/// Fill `{key}` placeholders in `template`. Unknown placeholders are kept.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (close, *v))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_single_pass() {
        let out = render("Q: {question} / {missing}", &[("question", "{question}?")]);
        assert_eq!(out, "Q: {question}? / {missing}");
    }

    #[test]
    fn templates_have_their_placeholders() {
        assert!(CONDENSE_QUESTION.contains("{history}") && CONDENSE_QUESTION.contains("{question}"));
        assert!(ANSWER_MANY_RESULTS.contains("{suggestions}"));
        assert!(SOURCE_FILTER.contains("{source}"));
        assert!(CAPTION_FILTER.contains("{caption}"));
        assert!(TABLE_SUMMARY.contains("{element}"));
    }
}
