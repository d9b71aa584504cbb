/// Terms pre-embedded at startup so the first user queries in the financial
/// domain hit the cache.
pub const FINANCIAL_VOCABULARY: &[&str] = &[
    "budget",
    "monthly budget",
    "emergency fund",
    "savings account",
    "high-yield savings",
    "checking account",
    "credit card debt",
    "credit score",
    "interest rate",
    "annual percentage rate",
    "compound interest",
    "mortgage",
    "refinance",
    "student loan",
    "debt consolidation",
    "debt snowball",
    "net worth",
    "cash flow",
    "income",
    "expenses",
    "discretionary spending",
    "fixed expenses",
    "retirement planning",
    "401k",
    "Roth IRA",
    "traditional IRA",
    "employer match",
    "index fund",
    "exchange traded fund",
    "mutual fund",
    "stocks",
    "bonds",
    "dividends",
    "asset allocation",
    "diversification",
    "risk tolerance",
    "rebalancing",
    "capital gains",
    "tax deduction",
    "tax bracket",
    "inflation",
    "insurance premium",
    "life insurance",
    "health savings account",
    "financial goals",
];

/// Owned copy of [`FINANCIAL_VOCABULARY`].
pub fn vocabulary() -> Vec<String> {
    FINANCIAL_VOCABULARY.iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn vocabulary_is_non_blank_and_unique() {
        let terms = vocabulary();
        assert!(terms.iter().all(|t| !t.trim().is_empty()));
        let unique: HashSet<_> = terms.iter().collect();
        assert_eq!(unique.len(), terms.len());
    }
}
