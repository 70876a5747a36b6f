use serde::Serialize;

/// One fee row as the aggregation sees it. Individual and family fees share
/// the same income/debt accessors so the summary fold never branches on kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeEntry {
    Individual { amount: f64, paid: bool },
    Family { total_amount: f64, paid_amount: f64, paid: bool },
}

impl FeeEntry {
    /// Money actually collected for this row.
    pub fn income(&self) -> f64 {
        match *self {
            FeeEntry::Individual { amount, paid } => {
                if paid {
                    amount
                } else {
                    0.0
                }
            }
            // Partial family payments count as collected even while the
            // record itself is still unpaid.
            FeeEntry::Family { paid_amount, .. } => paid_amount,
        }
    }

    /// Money still owed for this row. Family remainders are tracked on the
    /// record (paidAmount vs totalAmount) and are not part of debt.
    pub fn debt(&self) -> f64 {
        match *self {
            FeeEntry::Individual { amount, paid } => {
                if paid {
                    0.0
                } else {
                    amount
                }
            }
            FeeEntry::Family { .. } => 0.0,
        }
    }

    pub fn is_paid(&self) -> bool {
        match *self {
            FeeEntry::Individual { paid, .. } => paid,
            FeeEntry::Family { paid, .. } => paid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalaryEntry {
    pub amount: f64,
    pub bonus: f64,
    pub deductions: f64,
    pub paid: bool,
}

impl SalaryEntry {
    /// totalAmount is always derived, never stored.
    pub fn total(&self) -> f64 {
        self.amount + self.bonus - self.deductions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceSummary {
    pub month: u32,
    pub year: i32,
    pub income: f64,
    pub expenses: f64,
    pub debt: f64,
    pub net_profit: f64,
    pub paid_fees_count: usize,
    pub unpaid_fees_count: usize,
    pub paid_salaries_count: usize,
}

pub fn monthly_summary<F, S>(month: u32, year: i32, fees: F, salaries: S) -> FinanceSummary
where
    F: IntoIterator<Item = FeeEntry>,
    S: IntoIterator<Item = SalaryEntry>,
{
    let mut income = 0.0;
    let mut debt = 0.0;
    let mut paid_fees_count = 0usize;
    let mut unpaid_fees_count = 0usize;

    for fee in fees {
        income += fee.income();
        debt += fee.debt();
        if fee.is_paid() {
            paid_fees_count += 1;
        } else {
            unpaid_fees_count += 1;
        }
    }

    let mut expenses = 0.0;
    let mut paid_salaries_count = 0usize;
    for salary in salaries {
        if salary.paid {
            expenses += salary.total();
            paid_salaries_count += 1;
        }
    }

    FinanceSummary {
        month,
        year,
        income,
        expenses,
        debt,
        net_profit: income - expenses,
        paid_fees_count,
        unpaid_fees_count,
        paid_salaries_count,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyTotals {
    pub total_income: f64,
    pub total_expenses: f64,
    pub total_debt: f64,
    pub total_paid_fees: usize,
    pub total_paid_salaries: usize,
    pub total_unpaid_fees: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyBreakdown {
    pub year: i32,
    pub months: Vec<FinanceSummary>,
    pub totals: YearlyTotals,
}

pub fn yearly_breakdown(year: i32, months: Vec<FinanceSummary>) -> YearlyBreakdown {
    let mut totals = YearlyTotals {
        total_income: 0.0,
        total_expenses: 0.0,
        total_debt: 0.0,
        total_paid_fees: 0,
        total_paid_salaries: 0,
        total_unpaid_fees: 0,
    };
    for m in &months {
        totals.total_income += m.income;
        totals.total_expenses += m.expenses;
        totals.total_debt += m.debt;
        totals.total_paid_fees += m.paid_fees_count;
        totals.total_paid_salaries += m.paid_salaries_count;
        totals.total_unpaid_fees += m.unpaid_fees_count;
    }
    YearlyBreakdown {
        year,
        months,
        totals,
    }
}
